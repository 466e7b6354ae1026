//! Error types
//!
//! Three families:
//! - [`ClientError`]: a single command round-trip to one node failed
//! - [`ClusterError`]: an accumulated, non-fatal finding about the cluster
//! - [`TribError`]: an operation of this crate failed

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::node::NodeId;
use crate::slot::{format_slot_list, Slot, TOTAL_SLOTS};

/// Node connection errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Resp(#[from] resp::RespError),
    #[error("{0}")]
    Server(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("Connection closed")]
    Closed,
}

/// Malformed `CLUSTER NODES` output
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed node line: {0}")]
    MalformedLine(String),
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),
    #[error("Peer table has no 'myself' entry")]
    MissingSelf,
}

/// Migration marker kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Migrating,
    Importing,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerKind::Migrating => write!(f, "migrating"),
            MarkerKind::Importing => write!(f, "importing"),
        }
    }
}

/// Cluster finding collected by audits and repairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClusterError {
    #[error("Node {addr} is not reachable: {reason}")]
    Unreachable { addr: String, reason: String },
    #[error("{node} claims to be slave of unknown node ID {master}.")]
    UnknownMaster { node: String, master: NodeId },
    #[error("Nodes don't agree about configuration! (first disagreeing node: {node})")]
    Inconsistent { node: String },
    #[error("Node {node} has slots in {state} state ({}).", format_slot_list(.slots))]
    OpenSlots {
        node: String,
        state: MarkerKind,
        slots: Vec<Slot>,
    },
    #[error(
        "Slot(s) {} claimed by more than one master ({}).",
        format_slot_list(.slots),
        .owners.join(", ")
    )]
    MultipleOwners { owners: Vec<String>, slots: Vec<Slot> },
    #[error("Slot {slot} has no owner but node {node} holds keys for it.")]
    OrphanedKeys { slot: Slot, node: String },
    #[error("Could not count keys of slot {slot} on node {node}: {reason}")]
    Uncounted {
        node: String,
        slot: Slot,
        reason: String,
    },
    #[error("{step} stopped: {reason}")]
    Aborted { step: String, reason: String },
    #[error("Not all {} slots are covered by nodes ({missing} missing).", TOTAL_SLOTS)]
    Uncovered { covered: usize, missing: usize },
    #[error("Can't fix slot {slot}: {reason}")]
    Fix { slot: Slot, reason: String },
}

/// Operation errors
#[derive(Debug, thiserror::Error)]
pub enum TribError {
    #[error("Node {addr} is not reachable: {source}")]
    NotReachable {
        addr: String,
        #[source]
        source: ClientError,
    },
    #[error("Node {addr} is not configured as a cluster node.")]
    NotClusterMode { addr: String },
    #[error("Load info from node {addr} failed: {source}")]
    LoadInfo {
        addr: String,
        #[source]
        source: ClientError,
    },
    #[error("Node {addr} returned an unreadable peer table: {source}")]
    Parse {
        addr: String,
        #[source]
        source: ParseError,
    },
    #[error("Command on node {node} failed: {source}")]
    Client {
        node: String,
        #[source]
        source: ClientError,
    },
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("Node {0} has no address")]
    NoAddress(NodeId),
    #[error(transparent)]
    Fix(ClusterError),
    #[error("Repair requested but fixing is not authorized")]
    FixNotAuthorized,
    #[error("No master nodes in the cluster")]
    NoMasters,
    #[error("Cluster configuration did not converge after {attempts} attempts")]
    ConvergenceTimeout { attempts: u32 },
    #[error("Operation cancelled")]
    Cancelled,
}

impl TribError {
    /// Destination refused a key because it already exists
    pub fn is_busy_key(&self) -> bool {
        matches!(
            self,
            TribError::Client { source: ClientError::Server(msg), .. } if msg.starts_with("BUSYKEY")
        )
    }
}

/// Node lookup failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("No node matches '{0}'")]
    NotFound(String),
    #[error("Prefix '{prefix}' is ambiguous: {matches} nodes match")]
    Ambiguous { prefix: String, matches: usize },
}
