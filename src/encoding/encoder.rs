//! Row stream encoder

use super::errors::{CodecError, CodecResult};
use super::format::{binary_header, CopyFormat, TextOptions, BINARY_TRAILER};
use super::output::{binary_output, text_output, OutputFn};
use super::types::{ColumnType, Value};

/// Encodes rows of a fixed schema into a copy stream.
///
/// `begin()`, `encode_row()` and `end()` return slices of one scratch buffer
/// that is cleared, not reallocated, between calls. Callers write the slice to
/// every destination before encoding the next row.
#[derive(Debug)]
pub struct RowStreamEncoder {
    format: CopyFormat,
    text: TextOptions,
    outputs: Vec<OutputFn>,
    buffer: Vec<u8>,
    field: Vec<u8>,
}

impl RowStreamEncoder {
    /// Encoder for `schema`; binary only if enabled and every column supports it
    pub fn new(schema: &[ColumnType], binary_enabled: bool, text: TextOptions) -> Self {
        let format = CopyFormat::choose(schema, binary_enabled);
        let outputs = schema
            .iter()
            .map(|column| match format {
                CopyFormat::Binary => binary_output(*column).unwrap_or(text_output(*column)),
                CopyFormat::Text => text_output(*column),
            })
            .collect();

        Self {
            format,
            text,
            outputs,
            buffer: Vec::with_capacity(1024),
            field: Vec::with_capacity(256),
        }
    }

    pub fn format(&self) -> CopyFormat {
        self.format
    }

    pub fn column_count(&self) -> usize {
        self.outputs.len()
    }

    /// Stream prefix: the binary header, nothing for text
    pub fn begin(&mut self) -> &[u8] {
        self.buffer.clear();
        if self.format == CopyFormat::Binary {
            self.buffer.extend_from_slice(&binary_header());
        }
        &self.buffer
    }

    /// Encode one row. NULL is handled before the column's output function.
    pub fn encode_row(&mut self, row: &[Value]) -> CodecResult<&[u8]> {
        if row.len() != self.outputs.len() {
            return Err(CodecError::ArityMismatch {
                expected: self.outputs.len(),
                actual: row.len(),
            });
        }

        self.buffer.clear();
        match self.format {
            CopyFormat::Text => self.encode_text_row(row)?,
            CopyFormat::Binary => self.encode_binary_row(row)?,
        }
        Ok(&self.buffer)
    }

    /// Stream suffix: the binary trailer, nothing for text
    pub fn end(&mut self) -> &[u8] {
        self.buffer.clear();
        if self.format == CopyFormat::Binary {
            self.buffer.extend_from_slice(&BINARY_TRAILER.to_be_bytes());
        }
        &self.buffer
    }

    fn encode_text_row(&mut self, row: &[Value]) -> CodecResult<()> {
        let delimiter = self.text.delimiter;

        for (index, (value, output)) in row.iter().zip(&self.outputs).enumerate() {
            if index > 0 {
                self.buffer.push(delimiter);
            }
            if value.is_null() {
                self.buffer.extend_from_slice(self.text.null_token.as_bytes());
                continue;
            }

            self.field.clear();
            output(value, &mut self.field)?;
            escape_text(&self.field, delimiter, &mut self.buffer);
        }

        self.buffer.push(b'\n');
        Ok(())
    }

    fn encode_binary_row(&mut self, row: &[Value]) -> CodecResult<()> {
        self.buffer
            .extend_from_slice(&(row.len() as i16).to_be_bytes());

        for (value, output) in row.iter().zip(&self.outputs) {
            if value.is_null() {
                self.buffer.extend_from_slice(&(-1i32).to_be_bytes());
                continue;
            }

            let length_at = self.buffer.len();
            self.buffer.extend_from_slice(&[0; 4]);
            output(value, &mut self.buffer)?;
            let length = (self.buffer.len() - length_at - 4) as i32;
            self.buffer[length_at..length_at + 4].copy_from_slice(&length.to_be_bytes());
        }

        Ok(())
    }
}

/// Backslash-escape a text field
fn escape_text(field: &[u8], delimiter: u8, out: &mut Vec<u8>) {
    for &byte in field {
        let escaped = match byte {
            0x08 => Some(b'b'),
            0x0c => Some(b'f'),
            b'\n' => Some(b'n'),
            b'\r' => Some(b'r'),
            b'\t' => Some(b't'),
            0x0b => Some(b'v'),
            b'\\' => Some(b'\\'),
            _ if byte == delimiter => Some(byte),
            _ => None,
        };
        match escaped {
            Some(c) => {
                out.push(b'\\');
                out.push(c);
            }
            None => out.push(byte),
        }
    }
}
