//! Slot reconciliation
//!
//! A slot is open when some node carries a migrating/importing marker for it
//! or when more than one master claims it. Repair picks a single owner,
//! moves stray keys there and clears every marker. Each remote step is
//! applied to the cluster before the next one is decided, so an interrupted
//! repair leaves the slot open for the next pass and never worse than before.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::coverage::uncovered_slots;
use crate::error::{ClusterError, MarkerKind, TribError};
use crate::mover::move_slot;
use crate::node::NodeId;
use crate::session::ClusterSession;
use crate::slot::{format_ranges, Slot};
use crate::topology::Topology;

/// Slots with a marker on any node, or claimed by more than one master
pub fn open_slots(topology: &Topology) -> BTreeSet<Slot> {
    let mut open = BTreeSet::new();
    for node in topology.nodes() {
        open.extend(node.migrating.keys().copied());
        open.extend(node.importing.keys().copied());
    }
    open.extend(shared_slots(topology).into_keys());
    open
}

/// Slots claimed by more than one master, with the claimants in discovery order
fn shared_slots(topology: &Topology) -> BTreeMap<Slot, Vec<String>> {
    let mut claims: HashMap<Slot, Vec<String>> = HashMap::new();
    for node in topology.masters() {
        for slot in &node.slots {
            claims.entry(*slot).or_default().push(node.to_string());
        }
    }
    claims
        .into_iter()
        .filter(|(_, owners)| owners.len() > 1)
        .collect()
}

/// One finding per node per marker kind, plus one per group of slots
/// shared by the same masters
pub fn check_open_slots(topology: &Topology) -> Vec<ClusterError> {
    let mut findings = Vec::new();
    for node in topology.nodes() {
        for (state, markers) in [
            (MarkerKind::Migrating, &node.migrating),
            (MarkerKind::Importing, &node.importing),
        ] {
            if !markers.is_empty() {
                findings.push(ClusterError::OpenSlots {
                    node: node.to_string(),
                    state,
                    slots: markers.keys().copied().collect(),
                });
            }
        }
    }

    let mut shared: BTreeMap<Vec<String>, Vec<Slot>> = BTreeMap::new();
    for (slot, owners) in shared_slots(topology) {
        shared.entry(owners).or_default().push(slot);
    }
    findings.extend(
        shared
            .into_iter()
            .map(|(owners, slots)| ClusterError::MultipleOwners { owners, slots }),
    );
    findings
}

/// Result of [`find_open_slots`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotScan {
    /// Open slots, including uncovered slots that still hold keys
    pub open: BTreeSet<Slot>,
    /// Uncovered slots holding keys, with the first holder found
    pub orphaned: BTreeMap<Slot, NodeId>,
    /// Masters that stopped answering during the scan
    pub failed: Vec<ClusterError>,
}

/// Open slots plus uncovered slots that still hold keys somewhere
///
/// Read-only. A master that fails a key count is reported once and left out
/// of the rest of the scan.
pub async fn find_open_slots(session: &mut ClusterSession) -> SlotScan {
    let mut scan = SlotScan {
        open: open_slots(session.topology()),
        ..Default::default()
    };
    let masters = session.master_ids();
    let mut down: HashSet<NodeId> = HashSet::new();
    for slot in uncovered_slots(session.topology()) {
        for master in &masters {
            if down.contains(master) {
                continue;
            }
            match session.count_keys_in_slot(master, slot).await {
                Ok(0) => {}
                Ok(_) => {
                    warn!("Slot {} is not covered but node {} holds keys for it", slot, master);
                    scan.open.insert(slot);
                    scan.orphaned.insert(slot, master.clone());
                    break;
                }
                Err(e) => {
                    warn!("{}", e);
                    scan.failed.push(ClusterError::Uncounted {
                        node: session.label(master),
                        slot,
                        reason: e.to_string(),
                    });
                    down.insert(master.clone());
                }
            }
        }
    }
    scan
}

/// Masters involved in one open slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotParticipants {
    /// Masters claiming the slot
    pub owners: Vec<NodeId>,
    /// Masters exporting the slot
    pub migrating: Vec<NodeId>,
    /// Masters importing the slot
    pub importing: Vec<NodeId>,
    /// Masters with no claim and no marker that still hold keys for the slot
    pub unexpected: Vec<NodeId>,
}

/// Sort every master into its role for `slot`
pub async fn classify_slot(
    session: &mut ClusterSession,
    slot: Slot,
) -> Result<SlotParticipants, TribError> {
    let mut participants = SlotParticipants::default();
    for id in session.master_ids() {
        let Some(node) = session.topology().node(&id) else {
            continue;
        };
        let owns = node.owns(slot);
        let migrating = node.migrating.contains_key(&slot);
        let importing = node.importing.contains_key(&slot);

        if owns {
            participants.owners.push(id.clone());
        }
        if migrating {
            participants.migrating.push(id.clone());
        }
        if importing {
            participants.importing.push(id.clone());
        }
        if owns || migrating || importing {
            continue;
        }
        match session.count_keys_in_slot(&id, slot).await {
            Ok(0) => {}
            Ok(_) => participants.unexpected.push(id),
            Err(e) => warn!("Slot {}: skipping {}: {}", slot, id, e),
        }
    }
    Ok(participants)
}

/// One remote step taken by a repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    SetStable { node: NodeId },
    AddSlot { node: NodeId },
    DelSlot { node: NodeId },
    SetImporting { node: NodeId, source: NodeId },
    BumpEpoch { node: NodeId, reply: String },
    FinishMigration {
        source: NodeId,
        target: NodeId,
        keys_moved: usize,
    },
    MoveKeys {
        source: NodeId,
        target: NodeId,
        keys_moved: usize,
    },
}

/// Everything done to close one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRepair {
    pub slot: Slot,
    /// Owner after the repair; `None` when the slot was already stable
    pub owner: Option<NodeId>,
    pub actions: Vec<RepairAction>,
}

impl SlotRepair {
    fn new(slot: Slot) -> Self {
        Self {
            slot,
            owner: None,
            actions: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Result of a full reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub repaired: Vec<SlotRepair>,
    pub failed: Vec<ClusterError>,
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), TribError> {
    if cancel.is_cancelled() {
        Err(TribError::Cancelled)
    } else {
        Ok(())
    }
}

/// Candidate holding the most keys for `slot`; first seen wins ties
async fn most_keys(
    session: &mut ClusterSession,
    candidates: &[NodeId],
    slot: Slot,
) -> Result<Option<(NodeId, u64)>, TribError> {
    let mut best: Option<(NodeId, u64)> = None;
    for id in candidates {
        let count = session.count_keys_in_slot(id, slot).await?;
        if best.as_ref().map_or(true, |(_, max)| count > *max) {
            best = Some((id.clone(), count));
        }
    }
    Ok(best)
}

fn slot_marker(session: &ClusterSession, id: &str, slot: Slot, kind: MarkerKind) -> Option<NodeId> {
    let node = session.topology().node(id)?;
    match kind {
        MarkerKind::Migrating => node.migrating.get(&slot).cloned(),
        MarkerKind::Importing => node.importing.get(&slot).cloned(),
    }
}

/// Close one open slot
pub async fn fix_open_slot(
    session: &mut ClusterSession,
    slot: Slot,
    cancel: &CancellationToken,
) -> Result<SlotRepair, TribError> {
    if !session.fix() {
        return Err(TribError::FixNotAuthorized);
    }
    let mut repair = SlotRepair::new(slot);
    if session.topology().is_slot_stable(slot) {
        return Ok(repair);
    }

    ensure_not_cancelled(cancel)?;
    warn!("Fixing open slot {}", slot);
    let participants = classify_slot(session, slot).await?;
    info!(
        "Slot {}: owners {:?}, migrating {:?}, importing {:?}, unexpected {:?}",
        slot,
        participants.owners,
        participants.migrating,
        participants.importing,
        participants.unexpected
    );
    let SlotParticipants {
        owners,
        mut migrating,
        mut importing,
        unexpected,
    } = participants;

    let mut owner = match owners.as_slice() {
        [] => {
            let masters = session.master_ids();
            match most_keys(session, &masters, slot).await? {
                Some((id, count)) if count > 0 => id,
                _ => {
                    return Err(TribError::Fix(ClusterError::Fix {
                        slot,
                        reason: "no owner and no master holds keys for it".to_string(),
                    }))
                }
            }
        }
        [single] => single.clone(),
        _ => match most_keys(session, &owners, slot).await? {
            Some((winner, _)) => winner,
            None => return Err(TribError::NoMasters),
        },
    };

    // Key holders without a marker get one before anything is stabilized,
    // so an interrupted repair still leaves the slot open
    for id in unexpected.iter().filter(|id| **id != owner) {
        ensure_not_cancelled(cancel)?;
        session.set_slot_importing(id, slot, &owner).await?;
        repair.actions.push(RepairAction::SetImporting {
            node: id.clone(),
            source: owner.clone(),
        });
        importing.push(id.clone());
    }

    match owners.len() {
        0 => {
            ensure_not_cancelled(cancel)?;
            info!("Slot {} has no owner, assigning it to {}", slot, owner);
            session.set_slot_stable(&owner, slot).await?;
            repair.actions.push(RepairAction::SetStable {
                node: owner.clone(),
            });
            session.add_slots(&owner, &[slot]).await?;
            repair.actions.push(RepairAction::AddSlot {
                node: owner.clone(),
            });
            migrating.retain(|id| *id != owner);
            importing.retain(|id| *id != owner);
        }
        1 => {}
        n => {
            warn!("Slot {} has {} owners, keeping {}", slot, n, owner);
            for loser in owners.iter().filter(|id| **id != owner) {
                ensure_not_cancelled(cancel)?;
                session.del_slots(loser, &[slot]).await?;
                repair.actions.push(RepairAction::DelSlot {
                    node: loser.clone(),
                });
                if let Err(e) = session.set_slot_importing(loser, slot, &owner).await {
                    // Without its claim or a marker the loser's keys would be invisible
                    if let Err(undo) = session.add_slots(loser, &[slot]).await {
                        error!("Slot {}: could not restore the claim of {}: {}", slot, loser, undo);
                    }
                    return Err(e);
                }
                repair.actions.push(RepairAction::SetImporting {
                    node: loser.clone(),
                    source: owner.clone(),
                });
                if !importing.contains(loser) {
                    importing.push(loser.clone());
                }
            }
            let reply = session.bump_epoch(&owner).await?;
            repair.actions.push(RepairAction::BumpEpoch {
                node: owner.clone(),
                reply,
            });
        }
    }

    for id in migrating {
        ensure_not_cancelled(cancel)?;
        let destination = slot_marker(session, &id, slot, MarkerKind::Migrating);
        let finishes = match &destination {
            Some(dest) if id == owner => {
                slot_marker(session, dest, slot, MarkerKind::Importing).as_deref()
                    == Some(id.as_str())
            }
            _ => false,
        };

        if let (true, Some(dest)) = (finishes, destination) {
            info!("Slot {}: finishing migration from {} to {}", slot, id, dest);
            let opts = session.move_options().for_fix(false);
            let outcome = move_slot(session, &id, &dest, slot, &opts, cancel).await?;
            repair.actions.push(RepairAction::FinishMigration {
                source: id.clone(),
                target: dest.clone(),
                keys_moved: outcome.keys_moved,
            });
            importing.retain(|i| *i != dest);
            owner = dest;
            continue;
        }

        if id != owner && session.count_keys_in_slot(&id, slot).await? > 0 {
            let keys_moved = move_keys_to_owner(session, &id, &owner, slot, cancel).await?;
            repair.actions.push(RepairAction::MoveKeys {
                source: id.clone(),
                target: owner.clone(),
                keys_moved,
            });
        }
        session.set_slot_stable(&id, slot).await?;
        repair.actions.push(RepairAction::SetStable { node: id });
    }

    for id in importing {
        ensure_not_cancelled(cancel)?;
        if id != owner && session.count_keys_in_slot(&id, slot).await? > 0 {
            let keys_moved = move_keys_to_owner(session, &id, &owner, slot, cancel).await?;
            repair.actions.push(RepairAction::MoveKeys {
                source: id.clone(),
                target: owner.clone(),
                keys_moved,
            });
        }
        session.set_slot_stable(&id, slot).await?;
        repair.actions.push(RepairAction::SetStable { node: id });
    }

    repair.owner = Some(owner);
    Ok(repair)
}

async fn move_keys_to_owner(
    session: &mut ClusterSession,
    source: &str,
    owner: &str,
    slot: Slot,
    cancel: &CancellationToken,
) -> Result<usize, TribError> {
    info!("Slot {}: moving stray keys from {} to {}", slot, source, owner);
    let opts = session.move_options().for_fix(true);
    let outcome = move_slot(session, source, owner, slot, &opts, cancel).await?;
    Ok(outcome.keys_moved)
}

/// Find and close every open slot, one slot at a time
///
/// Slots that cannot be fixed, and masters that could not be scanned, end up
/// in `failed`; cancellation stops the whole pass.
pub async fn fix_open_slots(
    session: &mut ClusterSession,
    cancel: &CancellationToken,
) -> Result<ReconcileReport, TribError> {
    if !session.fix() {
        return Err(TribError::FixNotAuthorized);
    }
    let scan = find_open_slots(session).await;
    let mut report = fix_slots(session, &scan.open, cancel).await?;
    let mut failed = scan.failed;
    failed.append(&mut report.failed);
    report.failed = failed;
    Ok(report)
}

/// Close the given open slots, one slot at a time
pub async fn fix_slots(
    session: &mut ClusterSession,
    slots: &BTreeSet<Slot>,
    cancel: &CancellationToken,
) -> Result<ReconcileReport, TribError> {
    if !session.fix() {
        return Err(TribError::FixNotAuthorized);
    }
    let mut report = ReconcileReport::default();
    if slots.is_empty() {
        return Ok(report);
    }
    warn!("Fixing open slots: {}", format_ranges(slots));

    for &slot in slots {
        match fix_open_slot(session, slot, cancel).await {
            Ok(repair) => report.repaired.push(repair),
            Err(TribError::Cancelled) => return Err(TribError::Cancelled),
            Err(TribError::Fix(finding)) => {
                warn!("{}", finding);
                report.failed.push(finding);
            }
            Err(e) => {
                warn!("Slot {}: {}", slot, e);
                report.failed.push(ClusterError::Fix {
                    slot,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}
