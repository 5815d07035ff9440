//! Exchange error types
//!
//! Error codes:
//! - AERO_RESULT_ID_INVALID (ERROR severity, validation)
//! - AERO_CONFIG_INVALID (ERROR severity, validation)
//! - AERO_NAMESPACE_CREATE_FAILED (ERROR severity, resource)
//! - AERO_RESULT_FILE_IO (ERROR severity, resource)
//! - AERO_RESULT_ENCODE_FAILED (ERROR severity, resource)
//! - AERO_RESULT_DECODE_FAILED (ERROR severity, resource)
//! - AERO_CONNECTION_FAILED (FATAL severity, remote)
//! - AERO_CONNECTION_CLAIMED (FATAL severity, remote)
//! - AERO_REMOTE_COMMAND_FAILED (FATAL severity, remote)
//! - AERO_REMOTE_COPY_FAILED (ERROR severity, remote)
//! - AERO_PROTOCOL_VIOLATION (FATAL severity, remote)
//! - AERO_OPERATION_CANCELLED (FATAL severity, cancellation)
//! - AERO_INVALID_STATE (ERROR severity)
//! - AERO_SERVICE_START_FAILED (FATAL severity, resource)
//!
//! FATAL here means fatal to the owning distributed transaction, not to the
//! process: the caller must abort the transaction and let the end-of-transaction
//! path tear down the namespace.

use std::fmt;
use std::io;

use crate::connection::NodeAddress;

/// Severity levels for exchange errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, transaction may continue
    Error,
    /// Owning distributed transaction must abort
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Error taxonomy used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input, rejected before any I/O
    Validation,
    /// Local file system failure
    Resource,
    /// Remote peer or transport failure
    Remote,
    /// Operator-level cancellation observed
    Cancellation,
    /// API used out of order
    InvalidState,
}

/// Exchange error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorCode {
    /// Result identifier contains a character outside `[A-Za-z0-9_-]`
    AeroResultIdInvalid,
    /// Configuration failed validation
    AeroConfigInvalid,
    /// Namespace directory could not be created
    AeroNamespaceCreateFailed,
    /// Result file could not be opened, written or read
    AeroResultFileIo,
    /// Row could not be encoded
    AeroResultEncodeFailed,
    /// Result file contents could not be decoded
    AeroResultDecodeFailed,
    /// Transport-level failure, the connection is unusable
    AeroConnectionFailed,
    /// Connection already claimed by another operation
    AeroConnectionClaimed,
    /// Peer acknowledged a command with an unexpected status
    AeroRemoteCommandFailed,
    /// Peer reported failure at the end of a copy; connection remains usable
    AeroRemoteCopyFailed,
    /// Peer sent a malformed or unexpected message
    AeroProtocolViolation,
    /// Cancellation signal observed
    AeroOperationCancelled,
    /// Operation invoked in the wrong state
    AeroInvalidState,
    /// Result service could not start its runtime or listener
    AeroServiceStartFailed,
}

impl ExchangeErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeErrorCode::AeroResultIdInvalid => "AERO_RESULT_ID_INVALID",
            ExchangeErrorCode::AeroConfigInvalid => "AERO_CONFIG_INVALID",
            ExchangeErrorCode::AeroNamespaceCreateFailed => "AERO_NAMESPACE_CREATE_FAILED",
            ExchangeErrorCode::AeroResultFileIo => "AERO_RESULT_FILE_IO",
            ExchangeErrorCode::AeroResultEncodeFailed => "AERO_RESULT_ENCODE_FAILED",
            ExchangeErrorCode::AeroResultDecodeFailed => "AERO_RESULT_DECODE_FAILED",
            ExchangeErrorCode::AeroConnectionFailed => "AERO_CONNECTION_FAILED",
            ExchangeErrorCode::AeroConnectionClaimed => "AERO_CONNECTION_CLAIMED",
            ExchangeErrorCode::AeroRemoteCommandFailed => "AERO_REMOTE_COMMAND_FAILED",
            ExchangeErrorCode::AeroRemoteCopyFailed => "AERO_REMOTE_COPY_FAILED",
            ExchangeErrorCode::AeroProtocolViolation => "AERO_PROTOCOL_VIOLATION",
            ExchangeErrorCode::AeroOperationCancelled => "AERO_OPERATION_CANCELLED",
            ExchangeErrorCode::AeroInvalidState => "AERO_INVALID_STATE",
            ExchangeErrorCode::AeroServiceStartFailed => "AERO_SERVICE_START_FAILED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            ExchangeErrorCode::AeroConnectionFailed
            | ExchangeErrorCode::AeroConnectionClaimed
            | ExchangeErrorCode::AeroRemoteCommandFailed
            | ExchangeErrorCode::AeroProtocolViolation
            | ExchangeErrorCode::AeroOperationCancelled
            | ExchangeErrorCode::AeroServiceStartFailed => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns the taxonomy category
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExchangeErrorCode::AeroResultIdInvalid | ExchangeErrorCode::AeroConfigInvalid => {
                ErrorCategory::Validation
            }
            ExchangeErrorCode::AeroNamespaceCreateFailed
            | ExchangeErrorCode::AeroResultFileIo
            | ExchangeErrorCode::AeroResultEncodeFailed
            | ExchangeErrorCode::AeroResultDecodeFailed
            | ExchangeErrorCode::AeroServiceStartFailed => ErrorCategory::Resource,
            ExchangeErrorCode::AeroConnectionFailed
            | ExchangeErrorCode::AeroConnectionClaimed
            | ExchangeErrorCode::AeroRemoteCommandFailed
            | ExchangeErrorCode::AeroRemoteCopyFailed
            | ExchangeErrorCode::AeroProtocolViolation => ErrorCategory::Remote,
            ExchangeErrorCode::AeroOperationCancelled => ErrorCategory::Cancellation,
            ExchangeErrorCode::AeroInvalidState => ErrorCategory::InvalidState,
        }
    }
}

impl fmt::Display for ExchangeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Exchange error with full context
#[derive(Debug)]
pub struct ExchangeError {
    code: ExchangeErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl ExchangeError {
    fn new(code: ExchangeErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Attach additional context
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Result identifier failed character validation
    pub fn invalid_result_id(result_id: &str) -> Self {
        Self::new(
            ExchangeErrorCode::AeroResultIdInvalid,
            format!("result key \"{}\" contains invalid character", result_id),
        )
        .with_details("result keys may only contain letters, numbers, underscores and hyphens")
    }

    /// Configuration failed validation
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroConfigInvalid, message)
    }

    /// Namespace directory creation failed for a reason other than already-exists
    pub fn namespace_create_failed(path: &std::path::Path, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(
                ExchangeErrorCode::AeroNamespaceCreateFailed,
                format!(
                    "could not create intermediate results directory \"{}\"",
                    path.display()
                ),
            )
        }
    }

    /// Result file I/O failed
    pub fn file_io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(ExchangeErrorCode::AeroResultFileIo, message)
        }
    }

    /// Row encoding failed
    pub fn encode_failed(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroResultEncodeFailed, message)
    }

    /// Result decoding failed
    pub fn decode_failed(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroResultDecodeFailed, message)
    }

    /// Transport-level failure talking to a peer
    pub fn connection_failed(address: &NodeAddress, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroConnectionFailed, message)
            .with_details(format!("node: {}", address))
    }

    /// Transport-level failure with the underlying socket error
    pub fn connection_io(address: &NodeAddress, message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::connection_failed(address, message)
        }
    }

    /// Connection was already claimed by another operation
    pub fn connection_claimed(address: &NodeAddress) -> Self {
        Self::new(
            ExchangeErrorCode::AeroConnectionClaimed,
            "connection is already claimed exclusively by another operation",
        )
        .with_details(format!("node: {}", address))
    }

    /// Peer answered a command with an unexpected status
    pub fn remote_command_failed(address: &NodeAddress, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroRemoteCommandFailed, message)
            .with_details(format!("node: {}", address))
    }

    /// Peer reported failure at the end of a copy
    pub fn remote_copy_failed(address: &NodeAddress, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroRemoteCopyFailed, message)
            .with_details(format!("node: {}", address))
    }

    /// Peer violated the wire protocol
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroProtocolViolation, message)
    }

    /// Cancellation observed
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroOperationCancelled, message)
    }

    /// Operation invoked in the wrong state
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorCode::AeroInvalidState, message)
    }

    /// Result service failed before accepting any session
    pub fn service_start_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(ExchangeErrorCode::AeroServiceStartFailed, message)
        }
    }

    /// Returns the error code
    pub fn code(&self) -> ExchangeErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the taxonomy category
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Whether the owning distributed transaction must abort
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Whether the connection that produced this error may carry further commands
    pub fn connection_usable(&self) -> bool {
        !matches!(
            self.code,
            ExchangeErrorCode::AeroConnectionFailed
                | ExchangeErrorCode::AeroProtocolViolation
                | ExchangeErrorCode::AeroOperationCancelled
        )
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ExchangeErrorCode::AeroResultIdInvalid.code(), "AERO_RESULT_ID_INVALID");
        assert_eq!(ExchangeErrorCode::AeroRemoteCopyFailed.code(), "AERO_REMOTE_COPY_FAILED");
        assert_eq!(ExchangeErrorCode::AeroOperationCancelled.code(), "AERO_OPERATION_CANCELLED");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ExchangeErrorCode::AeroResultIdInvalid.category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            ExchangeErrorCode::AeroNamespaceCreateFailed.category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            ExchangeErrorCode::AeroRemoteCommandFailed.category(),
            ErrorCategory::Remote
        );
    }

    #[test]
    fn test_invalid_result_id_names_identifier_and_charset() {
        let err = ExchangeError::invalid_result_id("bad/key");
        let display = err.to_string();
        assert!(display.contains("bad/key"));
        assert!(display.contains("letters, numbers, underscores and hyphens"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_copy_failure_keeps_connection_usable() {
        let address = NodeAddress::new("worker-1", 5544);
        let copy = ExchangeError::remote_copy_failed(&address, "result missing");
        assert!(copy.connection_usable());
        assert!(!copy.is_fatal());

        let transport = ExchangeError::connection_failed(&address, "reset by peer");
        assert!(!transport.connection_usable());
        assert!(transport.is_fatal());
        assert!(transport.to_string().contains("worker-1:5544"));
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error;
        let err = ExchangeError::file_io(
            "could not append to file",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_service_start_failure_is_not_a_file_error() {
        use std::error::Error;
        let err = ExchangeError::service_start_failed(
            "could not start async runtime",
            io::Error::new(io::ErrorKind::Other, "too many threads"),
        );
        assert_eq!(err.code(), ExchangeErrorCode::AeroServiceStartFailed);
        assert_ne!(err.code(), ExchangeErrorCode::AeroResultFileIo);
        assert_eq!(err.category(), ErrorCategory::Resource);
        assert!(err.is_fatal());
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("[FATAL] AERO_SERVICE_START_FAILED"));
    }
}
