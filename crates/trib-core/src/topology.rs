//! Topology graph
//!
//! Ordered collection of node views (discovery order) with derived
//! master -> replicas relations, name lookup and accumulated warnings.

use std::collections::HashMap;

use crate::error::{ClusterError, LookupError};
use crate::node::{NodeId, NodeView};
use crate::slot::Slot;

/// In-memory view of the whole cluster
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<NodeView>,
    /// Whether mutating repairs are authorized
    fix: bool,
    /// Non-fatal findings collected while building the graph
    warnings: Vec<ClusterError>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from already-loaded views and derive replica lists
    pub fn from_nodes(nodes: Vec<NodeView>) -> Self {
        let mut topology = Self {
            nodes,
            ..Default::default()
        };
        topology.populate_replicas();
        topology
    }

    /// Append a node; a node whose ID is already present replaces the old view
    pub fn add_node(&mut self, node: NodeView) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Drop every node and warning
    pub fn reset_nodes(&mut self) {
        self.nodes.clear();
        self.warnings.clear();
    }

    pub fn nodes(&self) -> &[NodeView] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeView> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Masters in discovery order; a node reporting no role counts as one
    pub fn masters(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.iter().filter(|n| n.is_master())
    }

    pub fn set_fix(&mut self, fix: bool) {
        self.fix = fix;
    }

    pub fn fix(&self) -> bool {
        self.fix
    }

    pub fn record(&mut self, warning: ClusterError) {
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[ClusterError] {
        &self.warnings
    }

    /// Case-insensitive full ID match
    pub fn node_by_name(&self, name: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.id.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive unique prefix match; `None` when zero or several match
    pub fn node_by_abbreviated_name(&self, prefix: &str) -> Option<&NodeView> {
        match self.prefix_matches(prefix).as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    fn prefix_matches(&self, prefix: &str) -> Vec<&NodeView> {
        let prefix = prefix.to_ascii_lowercase();
        self.nodes
            .iter()
            .filter(|n| n.id.to_ascii_lowercase().starts_with(&prefix))
            .collect()
    }

    /// Resolve a full or abbreviated node name
    pub fn resolve(&self, name: &str) -> Result<&NodeView, LookupError> {
        if let Some(node) = self.node_by_name(name) {
            return Ok(node);
        }
        if name.is_empty() {
            return Err(LookupError::NotFound(name.to_string()));
        }
        match self.prefix_matches(name).as_slice() {
            [] => Err(LookupError::NotFound(name.to_string())),
            [only] => Ok(only),
            many => Err(LookupError::Ambiguous {
                prefix: name.to_string(),
                matches: many.len(),
            }),
        }
    }

    /// Master with the fewest replicas, first in discovery order on ties
    pub fn master_with_least_replicas(&self) -> Option<&NodeView> {
        let mut best: Option<&NodeView> = None;
        for master in self.masters() {
            if best.map_or(true, |b| master.replicas().len() < b.replicas().len()) {
                best = Some(master);
            }
        }
        best
    }

    /// Recompute every master's replica list from the `replicate_of` fields
    ///
    /// Replicas pointing at an ID that is not a master in this graph are
    /// recorded as `UnknownMaster` warnings.
    pub fn populate_replicas(&mut self) {
        let mut replicas: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut unknown = Vec::new();

        for node in &self.nodes {
            let Some(master_id) = &node.replicate_of else {
                continue;
            };
            match self.node(master_id) {
                Some(master) if master.is_master() => replicas
                    .entry(master_id.clone())
                    .or_default()
                    .push(node.id.clone()),
                _ => unknown.push(ClusterError::UnknownMaster {
                    node: node.to_string(),
                    master: master_id.clone(),
                }),
            }
        }

        for node in &mut self.nodes {
            node.set_replicas(replicas.remove(&node.id).unwrap_or_default());
        }
        for warning in unknown {
            tracing::warn!("{}", warning);
            self.record(warning);
        }
    }

    /// Masters that claim `slot`, in discovery order
    pub fn slot_owners(&self, slot: Slot) -> Vec<&NodeView> {
        self.masters().filter(|n| n.owns(slot)).collect()
    }

    /// Exactly one master owns the slot and no node carries a marker for it
    pub fn is_slot_stable(&self, slot: Slot) -> bool {
        self.slot_owners(slot).len() == 1 && !self.nodes.iter().any(|n| n.is_open(slot))
    }
}
