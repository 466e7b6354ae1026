//! TCP node connection
//!
//! One RESP connection per node with a single command in flight. A command
//! that times out leaves an unread reply on the socket, so the connection is
//! closed for good afterwards.

use async_trait::async_trait;
use bytes::Bytes;
use resp::{encode_command, AsyncRespParser, RespError, RespValue, DEFAULT_MAX_FRAME_SIZE};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use trib_core::{ClientError, Connector, NodeClient};

use crate::config::ConnectConfig;

pub struct RespClient {
    addr: String,
    reader: AsyncRespParser<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    command_timeout: Duration,
    broken: bool,
}

impl RespClient {
    pub fn new(addr: impl Into<String>, stream: TcpStream, command_timeout: Duration) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            addr: addr.into(),
            reader: AsyncRespParser::with_max_bytes(read_half, DEFAULT_MAX_FRAME_SIZE),
            writer: write_half,
            command_timeout,
            broken: false,
        }
    }

    async fn round_trip(&mut self, args: &[Bytes]) -> Result<RespValue, ClientError> {
        self.writer.write_all(&encode_command(args)).await?;
        self.writer.flush().await?;
        match self.reader.parse().await {
            Ok(reply) => Ok(reply),
            Err(RespError::UnexpectedEof) => Err(ClientError::Closed),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl NodeClient for RespClient {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&mut self, args: Vec<Bytes>) -> Result<RespValue, ClientError> {
        if self.broken {
            return Err(ClientError::Closed);
        }
        let limit = self.command_timeout;
        let result = match timeout(limit, self.round_trip(&args)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(limit)),
        };
        if matches!(
            result,
            Err(ClientError::Timeout(_)
                | ClientError::Io(_)
                | ClientError::Resp(_)
                | ClientError::Closed)
        ) {
            debug!("Connection to {} is no longer usable", self.addr);
            self.broken = true;
        }
        result
    }
}

/// Opens [`RespClient`] connections
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }

    pub fn from_config(config: &ConnectConfig) -> Self {
        Self::new(config.connect_timeout(), config.command_timeout())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<Box<dyn NodeClient>, ClientError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);
        Ok(Box::new(RespClient::new(addr, stream, self.command_timeout)))
    }
}
