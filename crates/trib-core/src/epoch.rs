//! Bootstrap config epochs
//!
//! A freshly created cluster has every node at config epoch 0.
//! `SET-CONFIG-EPOCH` is refused by nodes that already know other nodes,
//! so failures are only logged.

use tracing::{info, warn};

use crate::session::ClusterSession;

/// Send `CLUSTER SET-CONFIG-EPOCH n` to every node, `n` counting from 1 in
/// discovery order; returns how many nodes accepted
pub async fn assign_config_epochs(session: &mut ClusterSession) -> usize {
    let mut accepted = 0;
    for (epoch, id) in (1u64..).zip(session.node_ids()) {
        match session.set_config_epoch(&id, epoch).await {
            Ok(()) => accepted += 1,
            Err(e) => warn!("Config epoch {} not assigned: {}", epoch, e),
        }
    }
    info!("Assigned config epochs to {} node(s)", accepted);
    accepted
}
