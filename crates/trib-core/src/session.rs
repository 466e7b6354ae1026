//! Cluster session
//!
//! A topology plus one live connection per loaded node. Every mutating call
//! is sent to the node first and mirrored into the local view only after the
//! node accepted it, so the view never runs ahead of the cluster.

use bytes::Bytes;
use resp::RespValue;
use std::collections::HashMap;
use tracing::debug;

use crate::client::{
    check_reply, command, expect_integer, expect_keys, expect_ok, expect_text, NodeClient,
};
use crate::error::{ClientError, TribError};
use crate::mover::MoveOptions;
use crate::node::{NodeId, NodeView};
use crate::slot::Slot;
use crate::topology::Topology;

/// Options fixed when a session is opened
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Authorize repairs
    pub fix: bool,
    /// Bulk transfer settings used by repairs
    pub move_options: MoveOptions,
}

pub struct ClusterSession {
    seed: String,
    topology: Topology,
    clients: HashMap<NodeId, Box<dyn NodeClient>>,
    move_options: MoveOptions,
}

impl ClusterSession {
    pub fn new(seed: impl Into<String>, options: SessionOptions) -> Self {
        let mut topology = Topology::new();
        topology.set_fix(options.fix);
        Self {
            seed: seed.into(),
            topology,
            clients: HashMap::new(),
            move_options: options.move_options,
        }
    }

    /// Address discovery started from
    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn move_options(&self) -> &MoveOptions {
        &self.move_options
    }

    pub fn fix(&self) -> bool {
        self.topology.fix()
    }

    /// Add a loaded node together with its connection
    pub fn attach(&mut self, node: NodeView, client: Box<dyn NodeClient>) {
        self.clients.insert(node.id.clone(), client);
        self.topology.add_node(node);
    }

    /// IDs of every loaded node, in discovery order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.topology.nodes().iter().map(|n| n.id.clone()).collect()
    }

    /// IDs of every master, in discovery order
    pub fn master_ids(&self) -> Vec<NodeId> {
        self.topology.masters().map(|n| n.id.clone()).collect()
    }

    /// Display name of a node (its address), or the ID when unknown
    pub fn label(&self, id: &str) -> String {
        self.topology
            .node(id)
            .map(|n| n.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn view_mut(&mut self, id: &str) -> Result<&mut NodeView, TribError> {
        self.topology
            .node_mut(id)
            .ok_or_else(|| TribError::UnknownNode(id.to_string()))
    }

    /// Send a raw command; error replies come back as values
    pub async fn call(&mut self, id: &str, args: Vec<Bytes>) -> Result<RespValue, TribError> {
        let node = self.label(id);
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| TribError::UnknownNode(id.to_string()))?;
        debug!(
            "{} <- {}",
            node,
            args.iter()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        );
        client
            .call(args)
            .await
            .map_err(|source| TribError::Client { node, source })
    }

    async fn call_with<T>(
        &mut self,
        id: &str,
        args: Vec<Bytes>,
        decode: fn(RespValue) -> Result<T, ClientError>,
    ) -> Result<T, TribError> {
        let reply = self.call(id, args).await?;
        decode(reply).map_err(|source| TribError::Client {
            node: self.label(id),
            source,
        })
    }

    /// Run one command on every node in discovery order
    pub async fn call_each(
        &mut self,
        args: Vec<Bytes>,
    ) -> Vec<(String, Result<RespValue, TribError>)> {
        let mut replies = Vec::new();
        for id in self.node_ids() {
            let reply = self.call(&id, args.clone()).await;
            replies.push((self.label(&id), reply));
        }
        replies
    }

    /// Fetch and parse a node's current `CLUSTER NODES`
    pub async fn cluster_nodes(&mut self, id: &str) -> Result<NodeView, TribError> {
        let text = self
            .call_with(id, command!("CLUSTER", "NODES"), expect_text)
            .await?;
        NodeView::from_cluster_nodes(&text).map_err(|source| TribError::Parse {
            addr: self.label(id),
            source,
        })
    }

    /// Reload every node's own view and peer table
    pub async fn refresh_friends(&mut self) -> Result<(), TribError> {
        for id in self.node_ids() {
            let fresh = self.cluster_nodes(&id).await?;
            self.view_mut(&id)?.refresh_from(fresh);
        }
        Ok(())
    }

    pub async fn count_keys_in_slot(&mut self, id: &str, slot: Slot) -> Result<u64, TribError> {
        let count = self
            .call_with(
                id,
                command!("CLUSTER", "COUNTKEYSINSLOT", slot),
                expect_integer,
            )
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn get_keys_in_slot(
        &mut self,
        id: &str,
        slot: Slot,
        count: usize,
    ) -> Result<Vec<Bytes>, TribError> {
        self.call_with(
            id,
            command!("CLUSTER", "GETKEYSINSLOT", slot, count),
            expect_keys,
        )
        .await
    }

    pub async fn add_slots(&mut self, id: &str, slots: &[Slot]) -> Result<(), TribError> {
        let mut args = command!("CLUSTER", "ADDSLOTS");
        args.extend(slots.iter().map(|s| Bytes::from(s.to_string())));
        self.call_with(id, args, expect_ok).await?;
        self.view_mut(id)?.slots.extend(slots.iter().copied());
        Ok(())
    }

    pub async fn del_slots(&mut self, id: &str, slots: &[Slot]) -> Result<(), TribError> {
        let mut args = command!("CLUSTER", "DELSLOTS");
        args.extend(slots.iter().map(|s| Bytes::from(s.to_string())));
        self.call_with(id, args, expect_ok).await?;
        let view = self.view_mut(id)?;
        for slot in slots {
            view.slots.remove(slot);
        }
        Ok(())
    }

    pub async fn set_slot_stable(&mut self, id: &str, slot: Slot) -> Result<(), TribError> {
        self.call_with(id, command!("CLUSTER", "SETSLOT", slot, "STABLE"), expect_ok)
            .await?;
        self.view_mut(id)?.apply_set_slot_stable(slot);
        Ok(())
    }

    pub async fn set_slot_importing(
        &mut self,
        id: &str,
        slot: Slot,
        source: &str,
    ) -> Result<(), TribError> {
        self.call_with(
            id,
            command!("CLUSTER", "SETSLOT", slot, "IMPORTING", source),
            expect_ok,
        )
        .await?;
        self.view_mut(id)?.importing.insert(slot, source.to_string());
        Ok(())
    }

    pub async fn set_slot_migrating(
        &mut self,
        id: &str,
        slot: Slot,
        target: &str,
    ) -> Result<(), TribError> {
        self.call_with(
            id,
            command!("CLUSTER", "SETSLOT", slot, "MIGRATING", target),
            expect_ok,
        )
        .await?;
        self.view_mut(id)?.migrating.insert(slot, target.to_string());
        Ok(())
    }

    pub async fn set_slot_node(
        &mut self,
        id: &str,
        slot: Slot,
        owner: &str,
    ) -> Result<(), TribError> {
        self.call_with(
            id,
            command!("CLUSTER", "SETSLOT", slot, "NODE", owner),
            expect_ok,
        )
        .await?;
        self.view_mut(id)?.apply_set_slot_node(slot, owner);
        Ok(())
    }

    /// Returns the server's `BUMPED <epoch>` / `STILL <epoch>` status
    pub async fn bump_epoch(&mut self, id: &str) -> Result<String, TribError> {
        self.call_with(id, command!("CLUSTER", "BUMPEPOCH"), expect_text)
            .await
    }

    pub async fn set_config_epoch(&mut self, id: &str, epoch: u64) -> Result<(), TribError> {
        self.call_with(
            id,
            command!("CLUSTER", "SET-CONFIG-EPOCH", epoch),
            expect_ok,
        )
        .await?;
        self.view_mut(id)?.config_epoch = epoch;
        Ok(())
    }

    /// `MIGRATE host port "" 0 timeout [REPLACE] KEYS k...`
    ///
    /// `NOKEY` means none of the keys existed any more and is not an error.
    pub async fn migrate(
        &mut self,
        id: &str,
        host: &str,
        port: u16,
        timeout_ms: u64,
        replace: bool,
        keys: &[Bytes],
    ) -> Result<(), TribError> {
        let mut args = command!("MIGRATE", host, port, "", 0, timeout_ms);
        if replace {
            args.push(Bytes::from_static(b"REPLACE"));
        }
        args.push(Bytes::from_static(b"KEYS"));
        args.extend(keys.iter().cloned());
        self.call_with(id, args, |reply| {
            let reply = check_reply(reply)?;
            match reply.as_text().as_deref() {
                Some("OK") | Some("NOKEY") => Ok(()),
                _ => Err(ClientError::UnexpectedReply(reply.to_string())),
            }
        })
        .await
    }

    pub async fn dbsize(&mut self, id: &str) -> Result<u64, TribError> {
        let size = self
            .call_with(id, command!("DBSIZE"), expect_integer)
            .await?;
        Ok(size.max(0) as u64)
    }
}
