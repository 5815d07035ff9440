//! Per-column input functions, inverse of `output`

use chrono::{DateTime, TimeZone, Utc};

use super::errors::{CodecError, CodecResult};
use super::output::{POSTGRES_EPOCH_OFFSET_MICROS, TIMESTAMP_TEXT_FORMAT};
use super::types::{ColumnType, Value};

/// Parses one non-NULL field
pub type InputFn = fn(&[u8]) -> CodecResult<Value>;

/// Text input function; receives the de-escaped field
pub fn text_input(column: ColumnType) -> InputFn {
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

/// Binary input function
pub fn binary_input(column: ColumnType) -> CodecResult<InputFn> {
    let input: InputFn = match column {
        ColumnType::Bool => bool_binary,
        ColumnType::Int2 => int2_binary,
        ColumnType::Int4 => int4_binary,
        ColumnType::Int8 => int8_binary,
        ColumnType::Float4 => float4_binary,
        ColumnType::Float8 => float8_binary,
        ColumnType::Text => text_text,
        ColumnType::Bytea => bytea_binary,
        ColumnType::Timestamptz => timestamptz_binary,
        ColumnType::Json => return Err(CodecError::NoBinaryOutput(column.name())),
    };
    Ok(input)
}

fn utf8(column: ColumnType, bytes: &[u8]) -> CodecResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| CodecError::invalid(column.name(), e.to_string()))
}

fn parse<T: std::str::FromStr>(column: ColumnType, bytes: &[u8]) -> CodecResult<T>
where
    T::Err: std::fmt::Display,
{
    let text = utf8(column, bytes)?;
    text.parse::<T>()
        .map_err(|e| CodecError::invalid(column.name(), format!("\"{}\": {}", text, e)))
}

fn fixed<const N: usize>(column: ColumnType, bytes: &[u8]) -> CodecResult<[u8; N]> {
    bytes.try_into().map_err(|_| {
        CodecError::invalid(
            column.name(),
            format!("expected {} bytes, found {}", N, bytes.len()),
        )
    })
}

// Text

fn bool_text(bytes: &[u8]) -> CodecResult<Value> {
    match bytes {
        b"t" | b"true" => Ok(Value::Bool(true)),
        b"f" | b"false" => Ok(Value::Bool(false)),
        _ => Err(CodecError::invalid(
            ColumnType::Bool.name(),
            format!("\"{}\"", String::from_utf8_lossy(bytes)),
        )),
    }
}

fn int2_text(bytes: &[u8]) -> CodecResult<Value> {
    parse(ColumnType::Int2, bytes).map(Value::Int2)
}

fn int4_text(bytes: &[u8]) -> CodecResult<Value> {
    parse(ColumnType::Int4, bytes).map(Value::Int4)
}

fn int8_text(bytes: &[u8]) -> CodecResult<Value> {
    parse(ColumnType::Int8, bytes).map(Value::Int8)
}

fn float4_text(bytes: &[u8]) -> CodecResult<Value> {
    parse(ColumnType::Float4, bytes).map(Value::Float4)
}

fn float8_text(bytes: &[u8]) -> CodecResult<Value> {
    parse(ColumnType::Float8, bytes).map(Value::Float8)
}

fn text_text(bytes: &[u8]) -> CodecResult<Value> {
    utf8(ColumnType::Text, bytes).map(|s| Value::Text(s.to_string()))
}

fn hex_value(column: ColumnType, digit: u8) -> CodecResult<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(CodecError::invalid(
            column.name(),
            format!("invalid hexadecimal digit \"{}\"", digit as char),
        )),
    }
}

fn bytea_text(bytes: &[u8]) -> CodecResult<Value> {
    let column = ColumnType::Bytea;
    let hex = bytes
        .strip_prefix(b"\\x")
        .ok_or_else(|| CodecError::invalid(column.name(), "missing \\x prefix"))?;
    if hex.len() % 2 != 0 {
        return Err(CodecError::invalid(
            column.name(),
            "invalid hexadecimal data: odd number of digits",
        ));
    }

    let mut decoded = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        decoded.push((hex_value(column, pair[0])? << 4) | hex_value(column, pair[1])?);
    }
    Ok(Value::Bytea(decoded))
}

fn timestamptz_text(bytes: &[u8]) -> CodecResult<Value> {
    let column = ColumnType::Timestamptz;
    let text = utf8(column, bytes)?;
    DateTime::parse_from_str(text, TIMESTAMP_TEXT_FORMAT)
        .map(|ts| Value::Timestamptz(ts.with_timezone(&Utc)))
        .map_err(|e| CodecError::invalid(column.name(), format!("\"{}\": {}", text, e)))
}

fn json_text(bytes: &[u8]) -> CodecResult<Value> {
    serde_json::from_slice(bytes)
        .map(Value::Json)
        .map_err(|e| CodecError::invalid(ColumnType::Json.name(), e.to_string()))
}

// Binary

fn bool_binary(bytes: &[u8]) -> CodecResult<Value> {
    let [b] = fixed::<1>(ColumnType::Bool, bytes)?;
    Ok(Value::Bool(b != 0))
}

fn int2_binary(bytes: &[u8]) -> CodecResult<Value> {
    fixed(ColumnType::Int2, bytes).map(|b| Value::Int2(i16::from_be_bytes(b)))
}

fn int4_binary(bytes: &[u8]) -> CodecResult<Value> {
    fixed(ColumnType::Int4, bytes).map(|b| Value::Int4(i32::from_be_bytes(b)))
}

fn int8_binary(bytes: &[u8]) -> CodecResult<Value> {
    fixed(ColumnType::Int8, bytes).map(|b| Value::Int8(i64::from_be_bytes(b)))
}

fn float4_binary(bytes: &[u8]) -> CodecResult<Value> {
    fixed(ColumnType::Float4, bytes).map(|b| Value::Float4(f32::from_bits(u32::from_be_bytes(b))))
}

fn float8_binary(bytes: &[u8]) -> CodecResult<Value> {
    fixed(ColumnType::Float8, bytes).map(|b| Value::Float8(f64::from_bits(u64::from_be_bytes(b))))
}

fn bytea_binary(bytes: &[u8]) -> CodecResult<Value> {
    Ok(Value::Bytea(bytes.to_vec()))
}

fn timestamptz_binary(bytes: &[u8]) -> CodecResult<Value> {
    let column = ColumnType::Timestamptz;
    let micros = i64::from_be_bytes(fixed(column, bytes)?) + POSTGRES_EPOCH_OFFSET_MICROS;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .map(Value::Timestamptz)
        .ok_or_else(|| CodecError::invalid(column.name(), "timestamp out of range"))
}
