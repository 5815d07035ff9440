//! Row codec errors

use thiserror::Error;

use crate::errors::ExchangeError;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Row encoding and decoding errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    // ==================
    // Encoding
    // ==================
    /// Row width differs from the schema
    #[error("row has {actual} values but the schema has {expected} columns")]
    ArityMismatch { expected: usize, actual: usize },

    /// Value variant does not match its column
    #[error("{value} value cannot be written to a {column} column")]
    TypeMismatch {
        column: &'static str,
        value: &'static str,
    },

    /// Binary output requested for a text-only type
    #[error("column type {0} has no binary output function")]
    NoBinaryOutput(&'static str),

    // ==================
    // Decoding
    // ==================
    /// Binary stream does not start with the copy signature
    #[error("invalid binary copy file signature")]
    BadSignature,

    /// Input ended inside a header, row or field
    #[error("unexpected end of data at offset {0}")]
    Truncated(usize),

    /// Row carries a different number of fields than the schema
    #[error("row {row} has {actual} fields, expected {expected}")]
    FieldCount {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// Field payload could not be parsed
    #[error("invalid input for type {column}: {reason}")]
    InvalidValue {
        column: &'static str,
        reason: String,
    },

    /// Data follows the binary trailer
    #[error("trailing data after binary copy trailer")]
    TrailingData,
}

impl CodecError {
    pub fn invalid(column: &'static str, reason: impl Into<String>) -> Self {
        CodecError::InvalidValue {
            column,
            reason: reason.into(),
        }
    }

    fn is_encoding(&self) -> bool {
        matches!(
            self,
            CodecError::ArityMismatch { .. }
                | CodecError::TypeMismatch { .. }
                | CodecError::NoBinaryOutput(_)
        )
    }
}

impl From<CodecError> for ExchangeError {
    fn from(err: CodecError) -> Self {
        if err.is_encoding() {
            ExchangeError::encode_failed(err.to_string())
        } else {
            ExchangeError::decode_failed(err.to_string())
        }
    }
}
