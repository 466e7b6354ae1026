//! Node view
//!
//! A snapshot of one cluster member as reported by the member itself, plus
//! the member's own peer table ("friends").

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ParseError;
use crate::slot::{format_ranges, parse_slot, Slot, SlotRange};

/// Node ID (40 hex characters in a real cluster)
pub type NodeId = String;

/// Role/status tags of a node, in the order the node reported them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeFlags(Vec<String>);

impl NodeFlags {
    /// Parse the comma separated flag column
    pub fn parse(s: &str) -> Self {
        let mut flags = Self::default();
        for flag in s.split(',').filter(|f| !f.is_empty() && *f != "noflags") {
            flags.insert(flag);
        }
        flags
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.0.iter().any(|f| f == flag)
    }

    pub fn insert(&mut self, flag: &str) {
        if !self.contains(flag) {
            self.0.push(flag.to_string());
        }
    }

    pub fn remove(&mut self, flag: &str) {
        self.0.retain(|f| f != flag);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_master(&self) -> bool {
        self.contains("master")
    }

    /// Newer servers say `replica`
    pub fn is_slave(&self) -> bool {
        self.contains("slave") || self.contains("replica")
    }

    pub fn is_myself(&self) -> bool {
        self.contains("myself")
    }
}

impl fmt::Display for NodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// One cluster member as currently known
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeView {
    /// Node ID
    pub id: NodeId,
    /// `host:port`, empty when the node has no known address
    pub addr: String,
    /// Role and status flags
    pub flags: NodeFlags,
    /// Master this node replicates, if it is a replica
    pub replicate_of: Option<NodeId>,
    /// Config epoch from the node's own line
    pub config_epoch: u64,
    /// Cluster bus link state
    pub connected: bool,
    /// Owned slots
    pub slots: BTreeSet<Slot>,
    /// Slots being exported: slot -> destination node
    pub migrating: BTreeMap<Slot, NodeId>,
    /// Slots being imported: slot -> source node
    pub importing: BTreeMap<Slot, NodeId>,
    /// Replicas of this master; derived by `Topology::populate_replicas`
    replicas: Vec<NodeId>,
    /// The rest of this node's peer table as gossiped to it
    #[serde(skip)]
    pub friends: Vec<NodeView>,
}

impl NodeView {
    /// Create a view with no flags and no slots
    pub fn new(id: impl Into<NodeId>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            connected: true,
            ..Default::default()
        }
    }

    /// Create a master view
    pub fn master(id: impl Into<NodeId>, addr: impl Into<String>) -> Self {
        let mut node = Self::new(id, addr);
        node.flags.insert("master");
        node
    }

    /// Create a replica view of `master_id`
    pub fn replica(
        id: impl Into<NodeId>,
        addr: impl Into<String>,
        master_id: impl Into<NodeId>,
    ) -> Self {
        let mut node = Self::new(id, addr);
        node.flags.insert("slave");
        node.replicate_of = Some(master_id.into());
        node
    }

    /// Add an inclusive range of owned slots
    pub fn with_slots(mut self, start: Slot, end: Slot) -> Self {
        self.slots.extend(SlotRange::new(start, end).iter());
        self
    }

    /// Replace the gossiped peer table
    pub fn with_friends(mut self, friends: Vec<NodeView>) -> Self {
        self.friends = friends;
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Anything not flagged as a replica, including nodes reporting no role
    pub fn is_master(&self) -> bool {
        !self.flags.is_slave()
    }

    pub fn is_slave(&self) -> bool {
        self.flags.is_slave()
    }

    /// Replica IDs (derived)
    pub fn replicas(&self) -> &[NodeId] {
        &self.replicas
    }

    pub(crate) fn set_replicas(&mut self, replicas: Vec<NodeId>) {
        self.replicas = replicas;
    }

    pub fn owns(&self, slot: Slot) -> bool {
        self.slots.contains(&slot)
    }

    /// Slot carries a migrating or importing marker on this node
    pub fn is_open(&self, slot: Slot) -> bool {
        self.migrating.contains_key(&slot) || self.importing.contains_key(&slot)
    }

    /// Split `addr` into host and port
    pub fn host_port(&self) -> Option<(&str, u16)> {
        let (host, port) = self.addr.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some((host, port.parse().ok()?))
    }

    /// Short form of the ID used in log lines
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// Parse one `CLUSTER NODES` line
    ///
    /// `<id> <addr[@cport][,hostname]> <flags> <master|-> <ping> <pong> <epoch> <link> <slot>...`
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(ParseError::MalformedLine(line.to_string()));
        }

        let addr = fields[1]
            .split('@')
            .next()
            .and_then(|a| a.split(',').next())
            .unwrap_or_default();
        // ":0" and ":port" mean the address is unknown
        let addr = if addr.starts_with(':') { "" } else { addr };

        let config_epoch = fields[6]
            .parse::<u64>()
            .map_err(|_| ParseError::MalformedLine(line.to_string()))?;

        let mut node = Self {
            id: fields[0].to_string(),
            addr: addr.to_string(),
            flags: NodeFlags::parse(fields[2]),
            replicate_of: match fields[3] {
                "-" => None,
                master => Some(master.to_string()),
            },
            config_epoch,
            connected: fields[7] == "connected",
            ..Default::default()
        };

        for token in &fields[8..] {
            node.parse_slot_token(token)?;
        }
        Ok(node)
    }

    fn parse_slot_token(&mut self, token: &str) -> Result<(), ParseError> {
        let Some(inner) = token.strip_prefix('[') else {
            self.slots.extend(SlotRange::parse(token)?.iter());
            return Ok(());
        };
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| ParseError::InvalidSlot(token.to_string()))?;

        if let Some((slot, target)) = inner.split_once("->-") {
            self.migrating.insert(parse_slot(slot)?, target.to_string());
        } else if let Some((slot, source)) = inner.split_once("-<-") {
            self.importing.insert(parse_slot(slot)?, source.to_string());
        } else {
            return Err(ParseError::InvalidSlot(token.to_string()));
        }
        Ok(())
    }

    /// Parse a whole `CLUSTER NODES` reply
    pub fn parse_table(text: &str) -> Result<Vec<Self>, ParseError> {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(Self::parse_line)
            .collect()
    }

    /// Build the reporting node's own view from its `CLUSTER NODES` reply;
    /// every other entry becomes a friend
    pub fn from_cluster_nodes(text: &str) -> Result<Self, ParseError> {
        let mut me = None;
        let mut friends = Vec::new();
        for node in Self::parse_table(text)? {
            if me.is_none() && node.flags.is_myself() {
                me = Some(node);
            } else {
                friends.push(node);
            }
        }
        let mut me = me.ok_or(ParseError::MissingSelf)?;
        me.friends = friends;
        Ok(me)
    }

    /// Canonical summary of slot ownership as seen by this node
    ///
    /// Every master with at least one slot in this node's peer table
    /// contributes `id:ranges`; entries are sorted by ID and joined with `|`.
    /// Two nodes agree about the configuration iff their signatures are equal.
    pub fn config_signature(&self) -> String {
        let mut entries: Vec<(&str, String)> = std::iter::once(self)
            .chain(self.friends.iter())
            .filter(|n| n.is_master() && !n.slots.is_empty())
            .map(|n| (n.id.as_str(), format!("{}:{}", n.id, format_ranges(&n.slots))))
            .collect();
        entries.sort();
        entries
            .into_iter()
            .map(|(_, entry)| entry)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Multi-line description in the classic trib layout
    pub fn info_string(&self) -> String {
        let role = if self.is_master() { "M" } else { "S" };
        let mut out = format!("{}: {} {}", role, self.id, self.addr);
        out.push_str(&format!(
            "\n   slots:{} ({} slots) {}",
            format_ranges(&self.slots),
            self.slots.len(),
            self.flags
                .iter()
                .filter(|f| *f != "myself")
                .collect::<Vec<_>>()
                .join(",")
        ));
        if let Some(master) = &self.replicate_of {
            out.push_str(&format!("\n   replicates {}", master));
        } else if self.is_master() && !self.replicas.is_empty() {
            out.push_str(&format!(
                "\n   {} additional replica(s)",
                self.replicas.len()
            ));
        }
        out
    }

    /// Take everything the node reported in a fresh `CLUSTER NODES`,
    /// keeping the derived replica list
    pub(crate) fn refresh_from(&mut self, fresh: NodeView) {
        let replicas = std::mem::take(&mut self.replicas);
        let addr = std::mem::take(&mut self.addr);
        *self = fresh;
        self.replicas = replicas;
        if self.addr.is_empty() {
            self.addr = addr;
        }
    }

    pub(crate) fn apply_set_slot_stable(&mut self, slot: Slot) {
        self.migrating.remove(&slot);
        self.importing.remove(&slot);
    }

    pub(crate) fn apply_set_slot_node(&mut self, slot: Slot, owner: &str) {
        self.apply_set_slot_stable(slot);
        if self.id == owner {
            self.slots.insert(slot);
        } else {
            self.slots.remove(&slot);
        }
    }
}

impl fmt::Display for NodeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addr.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}", self.addr)
        }
    }
}
