//! Cluster topology discovery and slot reconciliation
//!
//! Builds an in-memory view of a slot-sharded cluster from independently
//! polled nodes and repairs it:
//! - Node views parsed from `CLUSTER NODES`
//! - Configuration consistency and slot coverage audits
//! - Open slot detection and repair
//! - Bulk key transfer between nodes
//!
//! # Usage Example
//! ```ignore
//! use trib_core::{check_cluster, discover, SessionOptions};
//!
//! let mut session = discover(&connector, "127.0.0.1:7000", SessionOptions::default()).await?;
//! let report = check_cluster(&mut session, &cancel).await?;
//! ```

pub mod check;
pub mod client;
pub mod consistency;
pub mod coverage;
pub mod discovery;
pub mod epoch;
pub mod error;
pub mod mover;
pub mod node;
pub mod reconcile;
pub mod session;
pub mod slot;
pub mod topology;

// Re-export commonly used types
pub use check::{check_cluster, cluster_summary, CheckReport, ClusterSummary, MasterSummary};
pub use client::{Connector, NodeClient};
pub use consistency::{
    check_config_consistency, is_config_consistent, wait_for_convergence, ConvergencePolicy,
};
pub use coverage::{
    check_slots_coverage, covered_slots, fix_slots_coverage, uncovered_slots, SlotAssignment,
};
pub use discovery::discover;
pub use epoch::assign_config_epochs;
pub use error::{ClientError, ClusterError, LookupError, MarkerKind, ParseError, TribError};
pub use mover::{move_slot, MoveOptions, MoveOutcome};
pub use node::{NodeFlags, NodeId, NodeView};
pub use reconcile::{
    check_open_slots, classify_slot, find_open_slots, fix_open_slot, fix_open_slots, fix_slots,
    open_slots, ReconcileReport, RepairAction, SlotParticipants, SlotRepair, SlotScan,
};
pub use session::{ClusterSession, SessionOptions};
pub use slot::{Slot, SlotRange, TOTAL_SLOTS};
pub use topology::Topology;
