//! Wire framing between a client connection and the result service
//!
//! Frame: `tag: u8`, `length: i32` big-endian (counts itself, not the tag),
//! then `length - 4` body bytes.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::encoding::CopyFormat;

const HEADER_LEN: usize = 5;
const READ_CHUNK: usize = 8192;

/// Wire-level failures
#[derive(Debug, Error)]
pub enum WireError {
    /// Peer closed the socket
    #[error("connection closed by peer")]
    Closed,

    /// Socket I/O failed
    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Tag byte is not part of the protocol
    #[error("unknown message tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Body larger than the configured maximum
    #[error("message body of {length} bytes exceeds maximum of {max}")]
    TooLarge { length: usize, max: usize },

    /// Length field smaller than itself
    #[error("invalid message length {0}")]
    InvalidLength(i32),

    /// Body does not match the tag
    #[error("malformed {0} message")]
    Malformed(&'static str),
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `S` client opens a session
    Startup { user_id: u32 },
    /// `Q` command text
    Query(String),
    /// `G` peer ready to receive copy data
    CopyInResponse { format: CopyFormat },
    /// `H` peer about to send copy data
    CopyOutResponse { format: CopyFormat },
    /// `d` copy data chunk
    CopyData(Vec<u8>),
    /// `c` end of copy data
    CopyDone,
    /// `f` client aborts a copy-in
    CopyFail(String),
    /// `C` command succeeded
    CommandComplete(String),
    /// `E` command failed
    ErrorResponse(String),
    /// `X` client closes the session
    Terminate,
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Startup { .. } => b'S',
            Message::Query(_) => b'Q',
            Message::CopyInResponse { .. } => b'G',
            Message::CopyOutResponse { .. } => b'H',
            Message::CopyData(_) => b'd',
            Message::CopyDone => b'c',
            Message::CopyFail(_) => b'f',
            Message::CommandComplete(_) => b'C',
            Message::ErrorResponse(_) => b'E',
            Message::Terminate => b'X',
        }
    }

    /// Append the framed message to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        let length_at = out.len();
        out.extend_from_slice(&[0; 4]);

        match self {
            Message::Startup { user_id } => out.extend_from_slice(&user_id.to_be_bytes()),
            Message::Query(text)
            | Message::CopyFail(text)
            | Message::CommandComplete(text)
            | Message::ErrorResponse(text) => {
                out.extend_from_slice(text.as_bytes());
                out.push(0);
            }
            Message::CopyInResponse { format } | Message::CopyOutResponse { format } => {
                out.push(format.code())
            }
            Message::CopyData(bytes) => out.extend_from_slice(bytes),
            Message::CopyDone | Message::Terminate => {}
        }

        let length = (out.len() - length_at) as i32;
        out[length_at..length_at + 4].copy_from_slice(&length.to_be_bytes());
    }

    /// Decode one message from the front of `buf`.
    ///
    /// Returns `None` until a whole frame is buffered, otherwise the message
    /// and the number of bytes it occupied.
    pub fn decode(buf: &[u8], max_body: usize) -> Result<Option<(Message, usize)>, WireError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = buf[0];
        let length = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        if length < 4 {
            return Err(WireError::InvalidLength(length));
        }
        let body_len = length as usize - 4;
        if body_len > max_body {
            return Err(WireError::TooLarge {
                length: body_len,
                max: max_body,
            });
        }

        let frame_len = HEADER_LEN + body_len;
        if buf.len() < frame_len {
            return Ok(None);
        }
        let body = &buf[HEADER_LEN..frame_len];

        let message = match tag {
            b'S' => {
                let bytes: [u8; 4] = body.try_into().map_err(|_| WireError::Malformed("startup"))?;
                Message::Startup {
                    user_id: u32::from_be_bytes(bytes),
                }
            }
            b'Q' => Message::Query(cstring(body, "query")?),
            b'G' => Message::CopyInResponse {
                format: copy_format(body, "copy-in response")?,
            },
            b'H' => Message::CopyOutResponse {
                format: copy_format(body, "copy-out response")?,
            },
            b'd' => Message::CopyData(body.to_vec()),
            b'c' => Message::CopyDone,
            b'f' => Message::CopyFail(cstring(body, "copy-fail")?),
            b'C' => Message::CommandComplete(cstring(body, "command-complete")?),
            b'E' => Message::ErrorResponse(cstring(body, "error")?),
            b'X' => Message::Terminate,
            other => return Err(WireError::UnknownTag(other)),
        };

        Ok(Some((message, frame_len)))
    }
}

fn cstring(body: &[u8], kind: &'static str) -> Result<String, WireError> {
    match body.split_last() {
        Some((0, text)) => String::from_utf8(text.to_vec()).map_err(|_| WireError::Malformed(kind)),
        _ => Err(WireError::Malformed(kind)),
    }
}

fn copy_format(body: &[u8], kind: &'static str) -> Result<CopyFormat, WireError> {
    match body {
        [code] => CopyFormat::from_code(*code).ok_or(WireError::Malformed(kind)),
        _ => Err(WireError::Malformed(kind)),
    }
}

/// Buffered message reader/writer over a TCP socket
#[derive(Debug)]
pub struct MessageStream {
    stream: TcpStream,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    max_body: usize,
}

impl MessageStream {
    pub fn new(stream: TcpStream, max_body: usize) -> Self {
        Self {
            stream,
            read_buf: Vec::with_capacity(READ_CHUNK),
            write_buf: Vec::with_capacity(READ_CHUNK),
            max_body,
        }
    }

    /// Wait for the next whole message
    pub async fn read_message(&mut self) -> Result<Message, WireError> {
        loop {
            if let Some(message) = self.take_buffered()? {
                return Ok(message);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(WireError::Closed);
            }
        }
    }

    /// Next message if one can be assembled without waiting
    pub fn try_read_message(&mut self) -> Result<Option<Message>, WireError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(message) = self.take_buffered()? {
                return Ok(Some(message));
            }
            match self.stream.try_read(&mut chunk) {
                Ok(0) => return Err(WireError::Closed),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait until the socket has data to read
    pub async fn readable(&self) -> Result<(), WireError> {
        self.stream.readable().await?;
        Ok(())
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<(), WireError> {
        self.write_buf.clear();
        message.encode(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn take_buffered(&mut self) -> Result<Option<Message>, WireError> {
        match Message::decode(&self.read_buf, self.max_body)? {
            Some((message, used)) => {
                self.read_buf.drain(..used);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }
}
