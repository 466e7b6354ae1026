//! RESP protocol encoder

use crate::RespValue;
use bytes::Bytes;
use std::io::{self, Write};

/// RESP protocol sync encoder
pub struct RespEncoder<W: Write> {
    writer: W,
}

impl<W: Write> RespEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode RESP value and write
    pub fn encode(&mut self, value: &RespValue) -> io::Result<()> {
        self.write_value(value)?;
        self.writer.flush()
    }

    fn write_value(&mut self, value: &RespValue) -> io::Result<()> {
        match value {
            RespValue::SimpleString(s) => {
                write!(self.writer, "+{}\r\n", String::from_utf8_lossy(s))?;
            }
            RespValue::Error(e) => {
                write!(self.writer, "-{}\r\n", String::from_utf8_lossy(e))?;
            }
            RespValue::Integer(i) => {
                write!(self.writer, ":{}\r\n", i)?;
            }
            RespValue::BulkString(Some(bytes)) => {
                write!(self.writer, "${}\r\n", bytes.len())?;
                self.writer.write_all(bytes)?;
                self.writer.write_all(b"\r\n")?;
            }
            RespValue::BulkString(None) | RespValue::Null => {
                self.writer.write_all(b"$-1\r\n")?;
            }
            RespValue::Array(items) => {
                write!(self.writer, "*{}\r\n", items.len())?;
                for item in items {
                    self.write_value(item)?;
                }
            }
        }
        Ok(())
    }
}

/// Encode RESP value into a byte vector
pub fn encode_to_vec(value: &RespValue) -> Vec<u8> {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail
    let _ = RespEncoder::new(&mut buffer).encode(value);
    buffer
}

/// Encode a command (array of bulk strings) ready to be written to a socket
pub fn encode_command(args: &[Bytes]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buffer.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buffer.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buffer.extend_from_slice(arg);
        buffer.extend_from_slice(b"\r\n");
    }
    buffer
}
