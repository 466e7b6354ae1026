//! RESP (REdis Serialization Protocol) support library
//!
//! Client side of the protocol used to talk to cluster nodes:
//! - command encoding (array of bulk strings)
//! - async reply parsing
//! - typed accessors over reply values

mod async_parser;
mod encoder;

pub use async_parser::{AsyncRespParser, DEFAULT_MAX_FRAME_SIZE};
pub use encoder::{encode_command, encode_to_vec, RespEncoder};

use bytes::Bytes;
use std::io;

/// RESP data type
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(Bytes),
    /// Error: -ERR message\r\n
    Error(Bytes),
    /// Integer: :123\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n
    BulkString(Option<Bytes>),
    /// Array: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
    Array(Vec<RespValue>),
    /// Null bulk string or null array: $-1\r\n / *-1\r\n
    Null,
}

impl RespValue {
    /// Build a command array from its arguments
    pub fn from_command(cmd: Vec<Bytes>) -> Self {
        RespValue::Array(
            cmd.into_iter()
                .map(|s| RespValue::BulkString(Some(s)))
                .collect(),
        )
    }

    /// Shorthand for a simple string reply
    pub fn simple(s: &str) -> Self {
        RespValue::SimpleString(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Shorthand for an error reply
    pub fn error(msg: &str) -> Self {
        RespValue::Error(Bytes::copy_from_slice(msg.as_bytes()))
    }

    /// Shorthand for a bulk string reply
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Error message if this is an error reply
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(e) => Some(String::from_utf8_lossy(e).into_owned()),
            _ => None,
        }
    }

    /// Integer payload; numeric bulk strings are accepted too
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            RespValue::BulkString(Some(b)) | RespValue::SimpleString(b) => {
                std::str::from_utf8(b).ok()?.trim().parse().ok()
            }
            _ => None,
        }
    }

    /// Text payload of a simple or bulk string
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(b) | RespValue::BulkString(Some(b)) => {
                Some(String::from_utf8_lossy(b).into_owned())
            }
            _ => None,
        }
    }

    /// Raw bytes of every string element of an array reply
    pub fn into_bytes_array(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(Some(b)) | RespValue::SimpleString(b) => Some(b),
                    _ => None,
                })
                .collect(),
            RespValue::Null => Some(Vec::new()),
            _ => None,
        }
    }

    /// `+OK` check
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s.as_ref() == b"OK")
    }
}

impl std::fmt::Display for RespValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", String::from_utf8_lossy(s)),
            RespValue::Error(e) => write!(f, "(error) {}", String::from_utf8_lossy(e)),
            RespValue::Integer(i) => write!(f, "(integer) {}", i),
            RespValue::BulkString(Some(b)) => write!(f, "{}", String::from_utf8_lossy(b)),
            RespValue::BulkString(None) | RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, item)?;
                }
                Ok(())
            }
        }
    }
}

/// RESP parsing error
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Integer overflow")]
    IntegerOverflow,
    #[error("Frame too large: {0} bytes (max: {1} bytes)")]
    FrameTooLarge(usize, usize),
    #[error("Invalid RESP type: {0}")]
    InvalidType(u8),
}
