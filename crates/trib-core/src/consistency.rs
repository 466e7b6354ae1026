//! Configuration consistency
//!
//! Nodes agree about the cluster when their configuration signatures are
//! byte-identical.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClusterError, TribError};
use crate::session::ClusterSession;
use crate::topology::Topology;

/// Every node's signature equals the first node's
pub fn is_config_consistent(topology: &Topology) -> bool {
    check_config_consistency(topology).is_ok()
}

/// Name the first node whose signature differs from the first node's
pub fn check_config_consistency(topology: &Topology) -> Result<(), ClusterError> {
    let mut nodes = topology.nodes().iter();
    let Some(first) = nodes.next() else {
        return Ok(());
    };
    let expected = first.config_signature();
    match nodes.find(|n| n.config_signature() != expected) {
        Some(node) => Err(ClusterError::Inconsistent {
            node: node.to_string(),
        }),
        None => Ok(()),
    }
}

/// How long and how often to poll for agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Poll every node's peer table until all signatures agree
///
/// Returns the number of polls it took. Failed polls are retried until the
/// deadline.
pub async fn wait_for_convergence(
    session: &mut ClusterSession,
    policy: &ConvergencePolicy,
    cancel: &CancellationToken,
) -> Result<u32, TribError> {
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0;

    info!("Waiting for the cluster to join");
    loop {
        if cancel.is_cancelled() {
            return Err(TribError::Cancelled);
        }
        attempts += 1;
        match session.refresh_friends().await {
            Ok(()) => match check_config_consistency(session.topology()) {
                Ok(()) => {
                    info!("Cluster configuration converged after {} poll(s)", attempts);
                    return Ok(attempts);
                }
                Err(e) => debug!("Poll {}: {}", attempts, e),
            },
            // A node that did not answer counts as not agreeing yet
            Err(e) => warn!("Poll {}: {}", attempts, e),
        }

        if Instant::now() + policy.interval > deadline {
            return Err(TribError::ConvergenceTimeout { attempts });
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(TribError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}
