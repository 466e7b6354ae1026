//! RESP protocol async reply parser

use crate::{RespError, RespValue};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Default maximum frame size: 512MB
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Upper bound on declared array length
const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// One decoded line: either a complete value or the header of an array
enum Header {
    Value(RespValue),
    Array(usize),
}

/// RESP protocol async parser
///
/// Nested arrays are decoded with an explicit stack instead of recursion so a
/// deeply nested reply cannot blow the task's stack.
pub struct AsyncRespParser<R: AsyncRead + Unpin> {
    reader: BufReader<R>,
    max_bytes: usize,
    bytes_read: usize,
}

impl<R: AsyncRead + Unpin> AsyncRespParser<R> {
    /// Create a new async parser (using default max frame size)
    pub fn new(reader: R) -> Self {
        Self::with_max_bytes(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new async parser with a frame size limit in bytes
    pub fn with_max_bytes(reader: R, max_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_bytes,
            bytes_read: 0,
        }
    }

    fn check_frame_size(&mut self, additional: usize) -> Result<(), RespError> {
        self.bytes_read = self.bytes_read.saturating_add(additional);
        if self.bytes_read > self.max_bytes {
            Err(RespError::FrameTooLarge(self.bytes_read, self.max_bytes))
        } else {
            Ok(())
        }
    }

    /// Parse the next complete reply
    pub async fn parse(&mut self) -> Result<RespValue, RespError> {
        self.bytes_read = 0;
        let mut stack: Vec<(usize, Vec<RespValue>)> = Vec::new();

        loop {
            let mut value = match self.read_header().await? {
                Header::Value(v) => v,
                Header::Array(0) => RespValue::Array(Vec::new()),
                Header::Array(n) => {
                    stack.push((n, Vec::with_capacity(n.min(1024))));
                    continue;
                }
            };

            loop {
                let Some((expected, mut items)) = stack.pop() else {
                    return Ok(value);
                };
                items.push(value);
                if items.len() < expected {
                    stack.push((expected, items));
                    break;
                }
                value = RespValue::Array(items);
            }
        }
    }

    /// Parse every reply until EOF
    pub async fn decode_eof(&mut self) -> Result<Vec<RespValue>, RespError> {
        let mut results = Vec::new();
        loop {
            match self.parse().await {
                Ok(value) => results.push(value),
                Err(RespError::UnexpectedEof) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    async fn read_header(&mut self) -> Result<Header, RespError> {
        let mut line = Vec::new();
        let n = self.reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(RespError::UnexpectedEof);
        }
        self.check_frame_size(n)?;

        if !line.ends_with(b"\r\n") {
            return Err(RespError::InvalidFormat(
                "Line not terminated by \\r\\n".to_string(),
            ));
        }
        line.truncate(line.len() - 2);
        if line.is_empty() {
            return Err(RespError::InvalidFormat("Empty line".to_string()));
        }

        let payload = &line[1..];
        match line[0] {
            b'+' => Ok(Header::Value(RespValue::SimpleString(Bytes::copy_from_slice(
                payload,
            )))),
            b'-' => Ok(Header::Value(RespValue::Error(Bytes::copy_from_slice(payload)))),
            b':' => Ok(Header::Value(RespValue::Integer(parse_integer(payload)?))),
            b'$' => self.read_bulk(payload).await.map(Header::Value),
            b'*' => {
                let count = parse_length(payload, "array")?;
                match count {
                    -1 => Ok(Header::Value(RespValue::Null)),
                    c if c < -1 || c > MAX_ARRAY_LEN => Err(RespError::InvalidFormat(format!(
                        "Invalid array length: {}",
                        c
                    ))),
                    c => Ok(Header::Array(c as usize)),
                }
            }
            other => Err(RespError::InvalidType(other)),
        }
    }

    async fn read_bulk(&mut self, payload: &[u8]) -> Result<RespValue, RespError> {
        let len = parse_length(payload, "bulk string")?;
        if len == -1 {
            return Ok(RespValue::Null);
        }
        if len < 0 {
            return Err(RespError::InvalidFormat(format!(
                "Invalid bulk string length: {}",
                len
            )));
        }

        let len = len as usize;
        self.check_frame_size(len + 2)?;

        let mut buffer = vec![0u8; len + 2];
        self.reader.read_exact(&mut buffer).await?;
        if !buffer.ends_with(b"\r\n") {
            return Err(RespError::InvalidFormat(
                "Expected \\r\\n after bulk string".to_string(),
            ));
        }
        buffer.truncate(len);
        Ok(RespValue::BulkString(Some(Bytes::from(buffer))))
    }
}

fn parse_integer(payload: &[u8]) -> Result<i64, RespError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| RespError::InvalidFormat("Integer is not valid UTF-8".to_string()))?;
    let num = text
        .parse::<i128>()
        .map_err(|_| RespError::InvalidFormat(format!("Invalid integer: {}", text)))?;
    i64::try_from(num).map_err(|_| RespError::IntegerOverflow)
}

fn parse_length(payload: &[u8], what: &str) -> Result<i64, RespError> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            RespError::InvalidFormat(format!(
                "Invalid {} length: {}",
                what,
                String::from_utf8_lossy(payload)
            ))
        })
}
