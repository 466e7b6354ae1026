//! Report rendering

use resp::RespValue;
use std::fmt::Write;
use trib_core::slot::format_ranges;
use trib_core::{CheckReport, ClusterSummary, RepairAction, TribError};

/// Human readable check report
pub fn render_check(report: &CheckReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        ">>> Cluster check via {} ({} nodes) at {}",
        report.seed,
        report.nodes,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if report.issues.is_empty() {
        let _ = writeln!(out, "[OK] No issues found.");
    }
    for issue in &report.issues {
        let _ = writeln!(out, "[ERR] {}", issue);
    }
    if !report.open_slots.is_empty() {
        let _ = writeln!(out, "Open slots: {}", format_ranges(&report.open_slots));
    }
    for repair in &report.repairs {
        match &repair.owner {
            Some(owner) => {
                let _ = writeln!(out, ">>> Fixed slot {} (owner {})", repair.slot, owner);
            }
            None => {
                let _ = writeln!(out, ">>> Slot {} was already stable", repair.slot);
            }
        }
        for action in &repair.actions {
            let _ = writeln!(out, "    {}", describe_action(action));
        }
    }
    if !report.assignments.is_empty() {
        let _ = writeln!(
            out,
            ">>> Covered {} slot(s): {}",
            report.assignments.len(),
            format_ranges(report.assignments.iter().map(|a| &a.slot))
        );
    }
    out
}

fn describe_action(action: &RepairAction) -> String {
    match action {
        RepairAction::SetStable { node } => format!("{}: SETSLOT STABLE", node),
        RepairAction::AddSlot { node } => format!("{}: ADDSLOTS", node),
        RepairAction::DelSlot { node } => format!("{}: DELSLOTS", node),
        RepairAction::SetImporting { node, source } => {
            format!("{}: SETSLOT IMPORTING {}", node, source)
        }
        RepairAction::BumpEpoch { node, reply } => format!("{}: BUMPEPOCH ({})", node, reply),
        RepairAction::FinishMigration {
            source,
            target,
            keys_moved,
        } => format!(
            "finished migration {} -> {} ({} keys)",
            source, target, keys_moved
        ),
        RepairAction::MoveKeys {
            source,
            target,
            keys_moved,
        } => format!("moved {} keys {} -> {}", keys_moved, source, target),
    }
}

/// `info` output in the classic layout
pub fn render_summary(summary: &ClusterSummary) -> String {
    let mut out = String::new();
    for master in &summary.masters {
        let _ = writeln!(
            out,
            "{} ({}...) -> {:<5} keys | {} slots | {} slaves.",
            master.addr,
            master.id.get(..8).unwrap_or(&master.id),
            master.keys,
            master.slots,
            master.replicas
        );
    }
    let _ = writeln!(
        out,
        "[OK] {} keys in {} masters.",
        summary.total_keys,
        summary.masters.len()
    );
    let _ = writeln!(out, "{:.2} keys per slot on average.", summary.keys_per_slot());
    out
}

/// One block per node for `call`
pub fn render_call(command: &str, replies: &[(String, Result<RespValue, TribError>)]) -> String {
    let mut out = String::new();
    for (addr, reply) in replies {
        let _ = writeln!(out, "{}: {}", addr, command);
        match reply {
            Ok(value) => {
                let _ = writeln!(out, "{}", value.to_string().trim());
            }
            Err(e) => {
                let _ = writeln!(out, "(error) {}", e);
            }
        }
    }
    out
}
