//! Row stream encoding
//!
//! Two copy-compatible formats:
//!
//! - text: delimiter-separated fields, `\n`-terminated rows, configurable NULL
//!   token, backslash escapes
//! - binary: `PGCOPY\n\377\r\n\0` header, flags and extension length, rows of
//!   `i16` field count plus `i32`-length-prefixed big-endian fields (`-1` for
//!   NULL), `i16 -1` trailer
//!
//! The format is chosen once per stream from the schema.

mod decoder;
mod encoder;
mod errors;
mod format;
mod input;
mod output;
mod types;

pub use decoder::RowStreamDecoder;
pub use encoder::RowStreamEncoder;
pub use errors::{CodecError, CodecResult};
pub use format::{binary_header, CopyFormat, TextOptions, BINARY_SIGNATURE, BINARY_TRAILER};
pub use types::{ColumnType, Row, Value};
