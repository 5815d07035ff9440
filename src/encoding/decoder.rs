//! Row stream decoder

use super::errors::{CodecError, CodecResult};
use super::format::{CopyFormat, TextOptions, BINARY_SIGNATURE, BINARY_TRAILER};
use super::input::{binary_input, text_input, InputFn};
use super::types::{ColumnType, Row, Value};

/// Decodes a complete copy stream produced by `RowStreamEncoder`
#[derive(Debug)]
pub struct RowStreamDecoder {
    format: CopyFormat,
    text: TextOptions,
    inputs: Vec<InputFn>,
}

impl RowStreamDecoder {
    pub fn new(schema: &[ColumnType], format: CopyFormat, text: TextOptions) -> CodecResult<Self> {
        let inputs = schema
            .iter()
            .map(|column| match format {
                CopyFormat::Binary => binary_input(*column),
                CopyFormat::Text => Ok(text_input(*column)),
            })
            .collect::<CodecResult<Vec<_>>>()?;

        Ok(Self {
            format,
            text,
            inputs,
        })
    }

    pub fn format(&self) -> CopyFormat {
        self.format
    }

    /// Decode every row in `data`. Empty input holds zero rows in either format.
    pub fn decode(&self, data: &[u8]) -> CodecResult<Vec<Row>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self.format {
            CopyFormat::Text => self.decode_text(data),
            CopyFormat::Binary => self.decode_binary(data),
        }
    }

    fn decode_text(&self, data: &[u8]) -> CodecResult<Vec<Row>> {
        let mut rows = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let line_end = data[offset..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|p| offset + p)
                .ok_or(CodecError::Truncated(data.len()))?;

            rows.push(self.decode_text_line(rows.len(), &data[offset..line_end])?);
            offset = line_end + 1;
        }

        Ok(rows)
    }

    fn decode_text_line(&self, row_index: usize, line: &[u8]) -> CodecResult<Row> {
        if self.inputs.is_empty() && line.is_empty() {
            return Ok(Vec::new());
        }

        let fields = split_fields(line, self.text.delimiter);
        if fields.len() != self.inputs.len() {
            return Err(CodecError::FieldCount {
                row: row_index,
                expected: self.inputs.len(),
                actual: fields.len(),
            });
        }

        let null_token = self.text.null_token.as_bytes();
        let mut unescaped = Vec::new();
        let mut row = Vec::with_capacity(fields.len());

        for (raw, input) in fields.into_iter().zip(&self.inputs) {
            // The NULL token is matched before de-escaping
            if raw == null_token {
                row.push(Value::Null);
                continue;
            }
            unescaped.clear();
            unescape_text(raw, &mut unescaped);
            row.push(input(&unescaped)?);
        }

        Ok(row)
    }

    fn decode_binary(&self, data: &[u8]) -> CodecResult<Vec<Row>> {
        let mut cursor = Cursor { data, offset: 0 };

        if cursor.take(BINARY_SIGNATURE.len())? != BINARY_SIGNATURE {
            return Err(CodecError::BadSignature);
        }
        let _flags = cursor.read_i32()?;
        let extension_length = cursor.read_i32()?;
        if extension_length < 0 {
            return Err(CodecError::invalid("header", "negative header extension length"));
        }
        cursor.take(extension_length as usize)?;

        let mut rows = Vec::new();
        loop {
            let field_count = cursor.read_i16()?;
            if field_count == BINARY_TRAILER {
                break;
            }
            if field_count < 0 || field_count as usize != self.inputs.len() {
                return Err(CodecError::FieldCount {
                    row: rows.len(),
                    expected: self.inputs.len(),
                    actual: field_count.max(0) as usize,
                });
            }

            let mut row = Vec::with_capacity(self.inputs.len());
            for input in &self.inputs {
                let length = cursor.read_i32()?;
                if length == -1 {
                    row.push(Value::Null);
                } else if length < 0 {
                    return Err(CodecError::invalid("field", format!("invalid length {}", length)));
                } else {
                    row.push(input(cursor.take(length as usize)?)?);
                }
            }
            rows.push(row);
        }

        if cursor.offset != data.len() {
            return Err(CodecError::TrailingData);
        }
        Ok(rows)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::Truncated(self.offset))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_i16(&mut self) -> CodecResult<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> CodecResult<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Split on unescaped delimiters, keeping escapes in place
fn split_fields(line: &[u8], delimiter: u8) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < line.len() {
        if line[i] == b'\\' {
            i += 2;
            continue;
        }
        if line[i] == delimiter {
            fields.push(&line[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    fields.push(&line[start.min(line.len())..]);
    fields
}

fn unescape_text(raw: &[u8], out: &mut Vec<u8>) {
    let mut bytes = raw.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(b'b') => out.push(0x08),
            Some(b'f') => out.push(0x0c),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'v') => out.push(0x0b),
            Some(other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
}
