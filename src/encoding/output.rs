//! Per-column output functions
//!
//! Text output writes the unescaped external representation; the encoder
//! escapes it. Binary output writes the field payload without its length.

use super::errors::{CodecError, CodecResult};
use super::types::{ColumnType, Value};

/// Writes one non-NULL value
pub type OutputFn = fn(&Value, &mut Vec<u8>) -> CodecResult<()>;

/// Microseconds between the Unix epoch and 2000-01-01 00:00:00 UTC
pub(crate) const POSTGRES_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// Text timestamp layout
pub(crate) const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn mismatch(column: ColumnType, value: &Value) -> CodecError {
    CodecError::TypeMismatch {
        column: column.name(),
        value: value.kind(),
    }
}

/// Text output function for a column type
pub fn text_output(column: ColumnType) -> OutputFn {
    match column {
        ColumnType::Bool => bool_text,
        ColumnType::Int2 => int2_text,
        ColumnType::Int4 => int4_text,
        ColumnType::Int8 => int8_text,
        ColumnType::Float4 => float4_text,
        ColumnType::Float8 => float8_text,
        ColumnType::Text => text_text,
        ColumnType::Bytea => bytea_text,
        ColumnType::Timestamptz => timestamptz_text,
        ColumnType::Json => json_text,
    }
}

/// Binary output function for a column type
pub fn binary_output(column: ColumnType) -> CodecResult<OutputFn> {
    let output: OutputFn = match column {
        ColumnType::Bool => bool_binary,
        ColumnType::Int2 => int2_binary,
        ColumnType::Int4 => int4_binary,
        ColumnType::Int8 => int8_binary,
        ColumnType::Float4 => float4_binary,
        ColumnType::Float8 => float8_binary,
        ColumnType::Text => text_binary,
        ColumnType::Bytea => bytea_binary,
        ColumnType::Timestamptz => timestamptz_binary,
        ColumnType::Json => return Err(CodecError::NoBinaryOutput(column.name())),
    };
    Ok(output)
}

// Text

fn bool_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Bool(v) => {
            out.push(if *v { b't' } else { b'f' });
            Ok(())
        }
        other => Err(mismatch(ColumnType::Bool, other)),
    }
}

fn int2_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Int2(v) => {
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Int2, other)),
    }
}

fn int4_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Int4(v) => {
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Int4, other)),
    }
}

fn int8_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Int8(v) => {
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Int8, other)),
    }
}

fn special_float(is_nan: bool, is_infinite: bool, negative: bool) -> Option<&'static str> {
    if is_nan {
        Some("NaN")
    } else if is_infinite && negative {
        Some("-Infinity")
    } else if is_infinite {
        Some("Infinity")
    } else {
        None
    }
}

fn float4_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Float4(v) => {
            match special_float(v.is_nan(), v.is_infinite(), v.is_sign_negative()) {
                Some(s) => out.extend_from_slice(s.as_bytes()),
                None => out.extend_from_slice(v.to_string().as_bytes()),
            }
            Ok(())
        }
        other => Err(mismatch(ColumnType::Float4, other)),
    }
}

fn float8_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Float8(v) => {
            match special_float(v.is_nan(), v.is_infinite(), v.is_sign_negative()) {
                Some(s) => out.extend_from_slice(s.as_bytes()),
                None => out.extend_from_slice(v.to_string().as_bytes()),
            }
            Ok(())
        }
        other => Err(mismatch(ColumnType::Float8, other)),
    }
}

fn text_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Text(v) => {
            out.extend_from_slice(v.as_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Text, other)),
    }
}

fn bytea_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Bytea(v) => {
            out.reserve(2 + v.len() * 2);
            out.extend_from_slice(b"\\x");
            for byte in v {
                out.push(HEX_DIGITS[(byte >> 4) as usize]);
                out.push(HEX_DIGITS[(byte & 0x0f) as usize]);
            }
            Ok(())
        }
        other => Err(mismatch(ColumnType::Bytea, other)),
    }
}

fn timestamptz_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Timestamptz(v) => {
            out.extend_from_slice(v.format(TIMESTAMP_TEXT_FORMAT).to_string().as_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Timestamptz, other)),
    }
}

fn json_text(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Json(v) => serde_json::to_writer(out, v)
            .map_err(|e| CodecError::invalid(ColumnType::Json.name(), e.to_string())),
        other => Err(mismatch(ColumnType::Json, other)),
    }
}

// Binary

fn bool_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Bool(v) => {
            out.push(u8::from(*v));
            Ok(())
        }
        other => Err(mismatch(ColumnType::Bool, other)),
    }
}

fn int2_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Int2(v) => {
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Int2, other)),
    }
}

fn int4_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Int4(v) => {
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Int4, other)),
    }
}

fn int8_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Int8(v) => {
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Int8, other)),
    }
}

fn float4_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Float4(v) => {
            out.extend_from_slice(&v.to_bits().to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Float4, other)),
    }
}

fn float8_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Float8(v) => {
            out.extend_from_slice(&v.to_bits().to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Float8, other)),
    }
}

fn text_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    text_text(value, out)
}

fn bytea_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Bytea(v) => {
            out.extend_from_slice(v);
            Ok(())
        }
        other => Err(mismatch(ColumnType::Bytea, other)),
    }
}

fn timestamptz_binary(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Timestamptz(v) => {
            let micros = v.timestamp_micros() - POSTGRES_EPOCH_OFFSET_MICROS;
            out.extend_from_slice(&micros.to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(ColumnType::Timestamptz, other)),
    }
}
