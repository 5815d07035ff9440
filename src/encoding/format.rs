//! Copy stream formats

use super::types::ColumnType;

/// Binary copy signature: `PGCOPY\n\377\r\n\0`
pub const BINARY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Field count that terminates a binary stream
pub const BINARY_TRAILER: i16 = -1;

/// Encoding of a result stream, fixed for the whole stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFormat {
    Text,
    Binary,
}

impl CopyFormat {
    /// Binary only when enabled and every column has a binary output function
    pub fn choose(schema: &[ColumnType], binary_enabled: bool) -> Self {
        if binary_enabled && schema.iter().all(ColumnType::supports_binary) {
            CopyFormat::Binary
        } else {
            CopyFormat::Text
        }
    }

    /// Wire code: 0 text, 1 binary
    pub fn code(&self) -> u8 {
        match self {
            CopyFormat::Text => 0,
            CopyFormat::Binary => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CopyFormat::Text),
            1 => Some(CopyFormat::Binary),
            _ => None,
        }
    }
}

/// Text format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOptions {
    pub delimiter: u8,
    pub null_token: String,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\t',
            null_token: "\\N".to_string(),
        }
    }
}

impl TextOptions {
    /// Reject options under which text escaping would not round-trip.
    ///
    /// The delimiter may not be a line terminator, a backslash, a lowercase
    /// letter, a digit, `.` or `N`, since those collide with escape sequences
    /// and the default NULL marker. The NULL marker may not contain the
    /// delimiter or a line terminator.
    pub fn validate(&self) -> Result<(), String> {
        let delimiter = self.delimiter;
        if !delimiter.is_ascii()
            || matches!(delimiter, b'\n' | b'\r' | b'\\' | b'.' | b'N')
            || delimiter.is_ascii_lowercase()
            || delimiter.is_ascii_digit()
        {
            return Err(format!(
                "text delimiter cannot be {:?}",
                char::from(delimiter)
            ));
        }

        if self.null_token.contains(['\n', '\r']) {
            return Err("null marker must not contain newline or carriage return".to_string());
        }

        if self.null_token.as_bytes().contains(&delimiter) {
            return Err(format!(
                "text delimiter {:?} must not appear in the null marker \"{}\"",
                char::from(delimiter),
                self.null_token
            ));
        }

        Ok(())
    }
}

/// Binary stream prefix: signature, flags, header extension length
pub fn binary_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(BINARY_SIGNATURE.len() + 8);
    header.extend_from_slice(BINARY_SIGNATURE);
    header.extend_from_slice(&0i32.to_be_bytes());
    header.extend_from_slice(&0i32.to_be_bytes());
    header
}
