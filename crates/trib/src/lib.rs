//! redtrib - check and repair tool for slot-sharded clusters
//!
//! The engine lives in `trib-core`; this crate adds the TCP node connection,
//! configuration and report rendering used by the `redtrib` binary.

pub mod client;
pub mod config;
pub mod output;

pub use client::{RespClient, TcpConnector};
pub use config::{Config, ConfigError};
