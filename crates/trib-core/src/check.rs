//! Cluster check and info reports

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::consistency::check_config_consistency;
use crate::coverage::{check_slots_coverage, fix_slots_coverage, SlotAssignment};
use crate::error::{ClusterError, TribError};
use crate::reconcile::{check_open_slots, find_open_slots, fix_slots, SlotRepair};
use crate::session::ClusterSession;
use crate::slot::{Slot, TOTAL_SLOTS};

/// Outcome of a check (and, when authorized, a fix) run
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub started_at: DateTime<Utc>,
    pub seed: String,
    pub nodes: usize,
    /// Findings, discovery warnings first
    pub issues: Vec<ClusterError>,
    /// Slots that were open when the audit ran
    pub open_slots: BTreeSet<Slot>,
    pub repairs: Vec<SlotRepair>,
    pub assignments: Vec<SlotAssignment>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Audit consistency, open slots and coverage; repair when fix is authorized
///
/// Open slots are repaired before coverage so that slots still holding keys
/// are assigned to the node holding them. Only cancellation ends the run
/// early; everything else becomes an issue in the report.
pub async fn check_cluster(
    session: &mut ClusterSession,
    cancel: &CancellationToken,
) -> Result<CheckReport, TribError> {
    let mut report = CheckReport {
        started_at: Utc::now(),
        seed: session.seed().to_string(),
        nodes: session.topology().len(),
        issues: session.topology().warnings().to_vec(),
        open_slots: BTreeSet::new(),
        repairs: Vec::new(),
        assignments: Vec::new(),
    };

    info!(">>> Performing cluster check (using node {})", report.seed);
    for node in session.topology().nodes() {
        info!("{}", node.info_string());
    }

    match check_config_consistency(session.topology()) {
        Ok(()) => info!("[OK] All nodes agree about slots configuration."),
        Err(e) => {
            warn!("[ERR] {}", e);
            report.issues.push(e);
        }
    }

    info!(">>> Check for open slots...");
    for finding in check_open_slots(session.topology()) {
        warn!("[WARNING] {}", finding);
        report.issues.push(finding);
    }
    let scan = find_open_slots(session).await;
    for (slot, holder) in &scan.orphaned {
        let finding = ClusterError::OrphanedKeys {
            slot: *slot,
            node: session.label(holder),
        };
        warn!("[WARNING] {}", finding);
        report.issues.push(finding);
    }
    for finding in scan.failed {
        warn!("[ERR] {}", finding);
        report.issues.push(finding);
    }
    report.open_slots = scan.open;
    if session.fix() {
        match fix_slots(session, &report.open_slots, cancel).await {
            Ok(reconciled) => {
                report.repairs = reconciled.repaired;
                report.issues.extend(reconciled.failed);
            }
            Err(TribError::Cancelled) => return Err(TribError::Cancelled),
            Err(e) => report.issues.push(aborted("Open slot repair", e)),
        }
    }

    info!(">>> Check slots coverage...");
    match check_slots_coverage(session.topology()) {
        Ok(()) => info!("[OK] All {} slots covered.", TOTAL_SLOTS),
        Err(e) => {
            warn!("[ERR] {}", e);
            report.issues.push(e);
            if session.fix() {
                match fix_slots_coverage(session).await {
                    Ok(assignments) => report.assignments = assignments,
                    Err(e) => report.issues.push(aborted("Coverage repair", e)),
                }
            }
        }
    }
    Ok(report)
}

fn aborted(step: &str, e: TribError) -> ClusterError {
    let finding = ClusterError::Aborted {
        step: step.to_string(),
        reason: e.to_string(),
    };
    warn!("[ERR] {}", finding);
    finding
}

/// Per master line of `info`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasterSummary {
    pub addr: String,
    pub id: String,
    pub keys: u64,
    pub slots: usize,
    pub replicas: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub masters: Vec<MasterSummary>,
    pub total_keys: u64,
}

impl ClusterSummary {
    pub fn keys_per_slot(&self) -> f64 {
        self.total_keys as f64 / TOTAL_SLOTS as f64
    }
}

/// Key, slot and replica counts per master; an unanswered `DBSIZE` counts as 0
pub async fn cluster_summary(session: &mut ClusterSession) -> ClusterSummary {
    let mut masters = Vec::new();
    let mut total_keys = 0;
    for id in session.master_ids() {
        let keys = match session.dbsize(&id).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("{}", e);
                0
            }
        };
        let Some(node) = session.topology().node(&id) else {
            continue;
        };
        total_keys += keys;
        masters.push(MasterSummary {
            addr: node.addr.clone(),
            id: node.id.clone(),
            keys,
            slots: node.slots.len(),
            replicas: node.replicas().len(),
        });
    }
    ClusterSummary {
        masters,
        total_keys,
    }
}
