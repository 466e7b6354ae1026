//! Node connection contract
//!
//! The engine talks to nodes only through these traits, so the real TCP
//! connection and the in-memory test cluster are interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use resp::RespValue;

use crate::error::ClientError;

/// One live connection to a node; at most one command in flight
#[async_trait]
pub trait NodeClient: Send {
    /// Address this connection was opened to
    fn addr(&self) -> &str;

    /// Send one command and wait for its reply
    ///
    /// Error replies are returned as `RespValue::Error`, not as `Err`.
    async fn call(&mut self, args: Vec<Bytes>) -> Result<RespValue, ClientError>;
}

/// Opens node connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<Box<dyn NodeClient>, ClientError>;
}

/// Build a command argument vector from anything that renders as text
macro_rules! command {
    ($($arg:expr),+ $(,)?) => {
        vec![$(::bytes::Bytes::from($arg.to_string())),+]
    };
}
pub(crate) use command;

/// Turn an error reply into `ClientError::Server`
pub(crate) fn check_reply(reply: RespValue) -> Result<RespValue, ClientError> {
    match reply.error_message() {
        Some(msg) => Err(ClientError::Server(msg)),
        None => Ok(reply),
    }
}

pub(crate) fn expect_ok(reply: RespValue) -> Result<(), ClientError> {
    let reply = check_reply(reply)?;
    if reply.is_ok() {
        Ok(())
    } else {
        Err(ClientError::UnexpectedReply(reply.to_string()))
    }
}

pub(crate) fn expect_integer(reply: RespValue) -> Result<i64, ClientError> {
    let reply = check_reply(reply)?;
    reply
        .as_integer()
        .ok_or_else(|| ClientError::UnexpectedReply(reply.to_string()))
}

pub(crate) fn expect_text(reply: RespValue) -> Result<String, ClientError> {
    let reply = check_reply(reply)?;
    reply
        .as_text()
        .ok_or_else(|| ClientError::UnexpectedReply(reply.to_string()))
}

pub(crate) fn expect_keys(reply: RespValue) -> Result<Vec<Bytes>, ClientError> {
    let reply = check_reply(reply)?;
    let shown = reply.to_string();
    reply
        .into_bytes_array()
        .ok_or(ClientError::UnexpectedReply(shown))
}
