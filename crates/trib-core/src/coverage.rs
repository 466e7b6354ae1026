//! Slot coverage
//!
//! Every slot must belong to some master. Coverage repair hands uncovered
//! slots to the least loaded masters.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::error::{ClusterError, TribError};
use crate::node::NodeId;
use crate::session::ClusterSession;
use crate::slot::{format_ranges, Slot, TOTAL_SLOTS};
use crate::topology::Topology;

/// Union of every master's slots
pub fn covered_slots(topology: &Topology) -> BTreeSet<Slot> {
    topology
        .masters()
        .flat_map(|n| n.slots.iter().copied())
        .collect()
}

/// Slots no master owns, ascending
pub fn uncovered_slots(topology: &Topology) -> Vec<Slot> {
    let covered = covered_slots(topology);
    (0..TOTAL_SLOTS).filter(|s| !covered.contains(s)).collect()
}

pub fn check_slots_coverage(topology: &Topology) -> Result<(), ClusterError> {
    let covered = covered_slots(topology).len();
    if covered == TOTAL_SLOTS as usize {
        Ok(())
    } else {
        Err(ClusterError::Uncovered {
            covered,
            missing: TOTAL_SLOTS as usize - covered,
        })
    }
}

/// One slot handed to a master by coverage repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAssignment {
    pub slot: Slot,
    pub node: NodeId,
}

/// Assign every uncovered slot to the master currently owning the fewest
/// slots, one `ADDSLOTS` per slot
pub async fn fix_slots_coverage(
    session: &mut ClusterSession,
) -> Result<Vec<SlotAssignment>, TribError> {
    if !session.fix() {
        return Err(TribError::FixNotAuthorized);
    }
    let missing = uncovered_slots(session.topology());
    if missing.is_empty() {
        return Ok(Vec::new());
    }
    if session.topology().masters().next().is_none() {
        return Err(TribError::NoMasters);
    }

    warn!(
        "Fixing slots coverage: {} uncovered slot(s) ({})",
        missing.len(),
        format_ranges(&missing)
    );
    let mut assignments = Vec::with_capacity(missing.len());
    for slot in missing {
        let Some(target) = least_loaded_master(session.topology()) else {
            return Err(TribError::NoMasters);
        };
        session.add_slots(&target, &[slot]).await?;
        assignments.push(SlotAssignment { slot, node: target });
    }
    info!("Assigned {} slot(s)", assignments.len());
    Ok(assignments)
}

fn least_loaded_master(topology: &Topology) -> Option<NodeId> {
    let mut best: Option<(usize, &str)> = None;
    for master in topology.masters() {
        if best.map_or(true, |(count, _)| master.slots.len() < count) {
            best = Some((master.slots.len(), &master.id));
        }
    }
    best.map(|(_, id)| id.to_string())
}
