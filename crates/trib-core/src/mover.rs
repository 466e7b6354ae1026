//! Bulk key transfer
//!
//! Moves every key of one slot from a source node to a target node with
//! `MIGRATE ... KEYS`. A key is deleted from the source only after the
//! target stored it, so a transfer that stops halfway can simply be run again.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TribError;
use crate::session::ClusterSession;
use crate::slot::Slot;

/// Default `MIGRATE` timeout in milliseconds
pub const DEFAULT_MIGRATE_TIMEOUT_MS: u64 = 60_000;

/// Default number of keys moved per `MIGRATE`
pub const DEFAULT_PIPELINE: usize = 10;

/// Transfer options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOptions {
    /// Log every batch
    pub verbose: bool,
    /// Retry a batch refused with `BUSYKEY` using `REPLACE`
    pub fix: bool,
    /// Move keys only; leave slot markers and ownership alone
    pub cold: bool,
    /// Mirror the ownership change into the local views
    pub update: bool,
    /// No summary line
    pub quiet: bool,
    /// Keys per batch
    pub pipeline: usize,
    /// `MIGRATE` timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            fix: false,
            cold: false,
            update: false,
            quiet: false,
            pipeline: DEFAULT_PIPELINE,
            timeout_ms: DEFAULT_MIGRATE_TIMEOUT_MS,
        }
    }
}

impl MoveOptions {
    /// Settings the reconciler uses when finishing a migration
    pub fn for_fix(&self, cold: bool) -> Self {
        Self {
            fix: true,
            cold,
            update: true,
            quiet: true,
            ..*self
        }
    }
}

/// What a transfer did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub keys_moved: usize,
    pub batches: usize,
}

/// Move all keys of `slot` from `source` to `target`
///
/// Without `cold`, the target is set importing before the source is set
/// migrating, and afterwards every master learns the new owner. Only the
/// source and target are required to accept it.
pub async fn move_slot(
    session: &mut ClusterSession,
    source: &str,
    target: &str,
    slot: Slot,
    opts: &MoveOptions,
    cancel: &CancellationToken,
) -> Result<MoveOutcome, TribError> {
    let target_view = session
        .topology()
        .node(target)
        .ok_or_else(|| TribError::UnknownNode(target.to_string()))?;
    let (host, port) = target_view
        .host_port()
        .map(|(h, p)| (h.to_string(), p))
        .ok_or_else(|| TribError::NoAddress(target.to_string()))?;
    let target_label = target_view.to_string();

    if !opts.cold {
        session.set_slot_importing(target, slot, source).await?;
        session.set_slot_migrating(source, slot, target).await?;
    }

    let mut outcome = MoveOutcome::default();
    let pipeline = opts.pipeline.max(1);
    loop {
        if cancel.is_cancelled() {
            return Err(TribError::Cancelled);
        }
        let keys = session.get_keys_in_slot(source, slot, pipeline).await?;
        if keys.is_empty() {
            break;
        }

        if let Err(e) = session
            .migrate(source, &host, port, opts.timeout_ms, false, &keys)
            .await
        {
            if !(opts.fix && e.is_busy_key()) {
                return Err(e);
            }
            warn!(
                "Slot {}: target {} already holds some keys, retrying with REPLACE",
                slot, target_label
            );
            session
                .migrate(source, &host, port, opts.timeout_ms, true, &keys)
                .await?;
        }

        outcome.keys_moved += keys.len();
        outcome.batches += 1;
        if opts.verbose {
            info!("Slot {}: moved {} key(s) to {}", slot, keys.len(), target_label);
        } else {
            debug!("Slot {}: moved {} key(s)", slot, keys.len());
        }
    }

    if !opts.cold {
        // Source and target must agree; other masters also learn it by gossip
        for master in session.master_ids() {
            match session.set_slot_node(&master, slot, target).await {
                Ok(()) => {}
                Err(e) if master != source && master != target => {
                    warn!("Slot {}: {}", slot, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
    if opts.update {
        if let Some(view) = session.topology_mut().node_mut(source) {
            view.slots.remove(&slot);
        }
        if let Some(view) = session.topology_mut().node_mut(target) {
            view.slots.insert(slot);
        }
    }

    if !opts.quiet {
        info!(
            "Moved slot {} to {}: {} key(s) in {} batch(es)",
            slot, target_label, outcome.keys_moved, outcome.batches
        );
    }
    Ok(outcome)
}
