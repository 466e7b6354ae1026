//! Topology discovery
//!
//! Load the seed node, then every peer the seed reports. Each peer is asked
//! for its own view; the seed's opinion of a peer is only used to find it.

use tracing::{debug, info, warn};

use crate::client::{command, expect_text, Connector, NodeClient};
use crate::error::{ClusterError, TribError};
use crate::node::NodeView;
use crate::session::{ClusterSession, SessionOptions};

/// `INFO cluster` reports `cluster_enabled:1`
async fn assert_cluster(client: &mut dyn NodeClient) -> Result<bool, TribError> {
    let addr = client.addr().to_string();
    let reply = client
        .call(command!("INFO", "cluster"))
        .await
        .map_err(|source| TribError::LoadInfo {
            addr: addr.clone(),
            source,
        })?;
    let text = expect_text(reply).map_err(|source| TribError::LoadInfo { addr, source })?;
    Ok(text
        .lines()
        .any(|line| line.trim() == "cluster_enabled:1"))
}

/// Load a node's own view (its `myself` line plus its peer table)
async fn load_info(client: &mut dyn NodeClient) -> Result<NodeView, TribError> {
    let addr = client.addr().to_string();
    let reply = client
        .call(command!("CLUSTER", "NODES"))
        .await
        .map_err(|source| TribError::LoadInfo {
            addr: addr.clone(),
            source,
        })?;
    let text = expect_text(reply).map_err(|source| TribError::LoadInfo {
        addr: addr.clone(),
        source,
    })?;
    let mut node = NodeView::from_cluster_nodes(&text).map_err(|source| TribError::Parse {
        addr: addr.clone(),
        source,
    })?;
    // Some servers report an empty address for themselves
    if node.addr.is_empty() {
        node.addr = addr;
    }
    Ok(node)
}

/// Build a session starting from `seed`
///
/// Failing to reach or load the seed is fatal. Peers that cannot be reached
/// or loaded are recorded as warnings and skipped.
pub async fn discover(
    connector: &dyn Connector,
    seed: &str,
    options: SessionOptions,
) -> Result<ClusterSession, TribError> {
    let mut session = ClusterSession::new(seed, options);

    let mut client = connector
        .connect(seed)
        .await
        .map_err(|source| TribError::NotReachable {
            addr: seed.to_string(),
            source,
        })?;
    if !assert_cluster(client.as_mut()).await? {
        return Err(TribError::NotClusterMode {
            addr: seed.to_string(),
        });
    }
    let me = load_info(client.as_mut()).await?;
    info!(
        "Performing cluster check (using node {}, {} peer(s) reported)",
        me,
        me.friends.len()
    );
    let friends = me.friends.clone();
    session.attach(me, client);

    for friend in friends {
        if friend.addr.is_empty() || friend.has_flag("noaddr") {
            debug!("Skipping {} without address", friend.id);
            continue;
        }
        if session.topology().node(&friend.id).is_some() {
            continue;
        }

        let mut client = match connector.connect(&friend.addr).await {
            Ok(client) => client,
            Err(e) => {
                let warning = ClusterError::Unreachable {
                    addr: friend.addr.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", warning);
                session.topology_mut().record(warning);
                continue;
            }
        };
        match load_info(client.as_mut()).await {
            Ok(node) => session.attach(node, client),
            Err(e) => {
                let warning = ClusterError::Unreachable {
                    addr: friend.addr.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", warning);
                session.topology_mut().record(warning);
            }
        }
    }

    session.topology_mut().populate_replicas();
    info!("Loaded {} node(s)", session.topology().len());
    Ok(session)
}
