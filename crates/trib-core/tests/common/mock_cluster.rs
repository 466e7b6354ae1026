// mock_cluster.rs
//
// In-memory cluster speaking enough of the cluster command set for the
// engine: every node keeps its own slots, markers and keys, and answers
// CLUSTER NODES from the shared state (optionally with a stale peer table).

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use resp::RespValue;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use trib_core::slot::compact_ranges;
use trib_core::{ClientError, Connector, NodeClient, Slot};

#[derive(Debug, Clone, Default)]
pub struct MockNode {
    pub id: String,
    pub addr: String,
    pub master: bool,
    pub replicate_of: Option<String>,
    pub config_epoch: u64,
    pub slots: BTreeSet<Slot>,
    pub migrating: BTreeMap<Slot, String>,
    pub importing: BTreeMap<Slot, String>,
    pub keys: BTreeMap<Slot, BTreeSet<String>>,
    pub cluster_enabled: bool,
    pub reject_config_epoch: bool,
}

impl MockNode {
    fn key_count(&self, slot: Slot) -> usize {
        self.keys.get(&slot).map_or(0, |k| k.len())
    }

    fn slot_of(&self, key: &str) -> Option<Slot> {
        self.keys
            .iter()
            .find(|(_, keys)| keys.contains(key))
            .map(|(slot, _)| *slot)
    }

    fn line(&self, myself: bool, slots: &BTreeSet<Slot>) -> String {
        let role = if self.master { "master" } else { "slave" };
        let flags = if myself {
            format!("myself,{}", role)
        } else {
            role.to_string()
        };
        let port = self
            .addr
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u32>().ok())
            .unwrap_or(0);
        let mut line = format!(
            "{} {}@{} {} {} 0 0 {} connected",
            self.id,
            self.addr,
            port + 10000,
            flags,
            self.replicate_of.as_deref().unwrap_or("-"),
            self.config_epoch
        );
        for range in compact_ranges(slots) {
            line.push(' ');
            line.push_str(&range.to_string());
        }
        if myself {
            for (slot, target) in &self.migrating {
                line.push_str(&format!(" [{}->-{}]", slot, target));
            }
            for (slot, source) in &self.importing {
                line.push_str(&format!(" [{}-<-{}]", slot, source));
            }
        }
        line
    }
}

/// Stale opinion an observer keeps about a peer's slots for a number of polls
#[derive(Debug, Clone)]
struct StaleView {
    peer: String,
    slots: BTreeSet<Slot>,
    remaining: u32,
}

#[derive(Default)]
struct State {
    nodes: Vec<MockNode>,
    unreachable: HashSet<String>,
    /// Command prefixes that fail as if the connection dropped
    failing: HashSet<String>,
    stale: HashMap<String, StaleView>,
    log: Vec<(String, String)>,
}

impl State {
    fn by_addr(&self, addr: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.addr == addr)
    }

    fn by_id(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    fn cluster_nodes(&mut self, me: usize) -> String {
        let observer = self.nodes[me].id.clone();
        let stale = match self.stale.get_mut(&observer) {
            Some(view) if view.remaining > 0 => {
                view.remaining -= 1;
                Some(view.clone())
            }
            _ => None,
        };

        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let slots = match &stale {
                Some(view) if view.peer == node.id => &view.slots,
                _ => &node.slots,
            };
            out.push_str(&node.line(i == me, slots));
            out.push('\n');
        }
        out
    }

    fn execute(&mut self, me: usize, args: &[String]) -> RespValue {
        let upper: Vec<String> = args.iter().map(|a| a.to_ascii_uppercase()).collect();
        let words: Vec<&str> = upper.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["INFO", ..] => {
                let enabled = if self.nodes[me].cluster_enabled { 1 } else { 0 };
                RespValue::bulk(format!("# Cluster\r\ncluster_enabled:{}\r\n", enabled))
            }
            ["DBSIZE"] => {
                let total: usize = self.nodes[me].keys.values().map(|k| k.len()).sum();
                RespValue::Integer(total as i64)
            }
            ["CLUSTER", "NODES"] => RespValue::bulk(self.cluster_nodes(me)),
            ["CLUSTER", "COUNTKEYSINSLOT", _] => match args[2].parse::<Slot>() {
                Ok(slot) => RespValue::Integer(self.nodes[me].key_count(slot) as i64),
                Err(_) => RespValue::error("ERR Invalid slot"),
            },
            ["CLUSTER", "GETKEYSINSLOT", _, _] => {
                let (Ok(slot), Ok(count)) = (args[2].parse::<Slot>(), args[3].parse::<usize>())
                else {
                    return RespValue::error("ERR Invalid slot or number of keys");
                };
                let keys = self.nodes[me]
                    .keys
                    .get(&slot)
                    .map(|k| k.iter().take(count).cloned().collect::<Vec<_>>())
                    .unwrap_or_default();
                RespValue::Array(keys.into_iter().map(RespValue::bulk).collect())
            }
            ["CLUSTER", "ADDSLOTS", ..] => {
                let node = &mut self.nodes[me];
                for arg in &args[2..] {
                    let Ok(slot) = arg.parse::<Slot>() else {
                        return RespValue::error("ERR Invalid slot");
                    };
                    if node.slots.contains(&slot) {
                        return RespValue::error(&format!("ERR Slot {} is already busy", slot));
                    }
                }
                node.slots.extend(args[2..].iter().filter_map(|a| a.parse::<Slot>().ok()));
                RespValue::simple("OK")
            }
            ["CLUSTER", "DELSLOTS", ..] => {
                let node = &mut self.nodes[me];
                for slot in args[2..].iter().filter_map(|a| a.parse::<Slot>().ok()) {
                    node.slots.remove(&slot);
                }
                RespValue::simple("OK")
            }
            ["CLUSTER", "SETSLOT", _, "STABLE"] => {
                let Ok(slot) = args[2].parse::<Slot>() else {
                    return RespValue::error("ERR Invalid slot");
                };
                let node = &mut self.nodes[me];
                node.migrating.remove(&slot);
                node.importing.remove(&slot);
                RespValue::simple("OK")
            }
            ["CLUSTER", "SETSLOT", _, state, _] => {
                let Ok(slot) = args[2].parse::<Slot>() else {
                    return RespValue::error("ERR Invalid slot");
                };
                let other = args[4].clone();
                if self.by_id(&other).is_none() {
                    return RespValue::error(&format!("ERR I don't know about node {}", other));
                }
                let node = &mut self.nodes[me];
                match *state {
                    "IMPORTING" => {
                        if node.slots.contains(&slot) {
                            return RespValue::error(&format!(
                                "ERR I'm already the owner of hash slot {}",
                                slot
                            ));
                        }
                        node.importing.insert(slot, other);
                    }
                    "MIGRATING" => {
                        if !node.slots.contains(&slot) {
                            return RespValue::error(&format!(
                                "ERR I'm not the owner of hash slot {}",
                                slot
                            ));
                        }
                        node.migrating.insert(slot, other);
                    }
                    "NODE" => {
                        node.migrating.remove(&slot);
                        node.importing.remove(&slot);
                        if node.id == other {
                            node.slots.insert(slot);
                        } else {
                            node.slots.remove(&slot);
                        }
                    }
                    _ => return RespValue::error("ERR Invalid CLUSTER SETSLOT action"),
                }
                RespValue::simple("OK")
            }
            ["CLUSTER", "BUMPEPOCH"] => {
                let max = self.nodes.iter().map(|n| n.config_epoch).max().unwrap_or(0);
                let node = &mut self.nodes[me];
                if node.config_epoch == max && max > 0 {
                    RespValue::simple(&format!("STILL {}", max))
                } else {
                    node.config_epoch = max + 1;
                    RespValue::simple(&format!("BUMPED {}", max + 1))
                }
            }
            ["CLUSTER", "SET-CONFIG-EPOCH", _] => {
                let node = &mut self.nodes[me];
                if node.reject_config_epoch {
                    return RespValue::error(
                        "ERR The user can assign a config epoch only when the node does not know any other node.",
                    );
                }
                match args[2].parse::<u64>() {
                    Ok(epoch) => {
                        node.config_epoch = epoch;
                        RespValue::simple("OK")
                    }
                    Err(_) => RespValue::error("ERR Invalid config epoch"),
                }
            }
            ["MIGRATE", ..] => self.migrate(me, args),
            _ => RespValue::error(&format!("ERR unknown command '{}'", args.join(" "))),
        }
    }

    fn migrate(&mut self, me: usize, args: &[String]) -> RespValue {
        // MIGRATE host port "" 0 timeout [REPLACE] KEYS k...
        if args.len() < 7 {
            return RespValue::error("ERR wrong number of arguments for 'migrate' command");
        }
        let target_addr = format!("{}:{}", args[1], args[2]);
        let Some(target) = self.by_addr(&target_addr) else {
            return RespValue::error("IOERR error or timeout connecting to the client");
        };
        let replace = args[6..].iter().any(|a| a.eq_ignore_ascii_case("REPLACE"));
        let Some(keys_at) = args.iter().position(|a| a.eq_ignore_ascii_case("KEYS")) else {
            return RespValue::error("ERR syntax error");
        };
        let keys: Vec<(String, Slot)> = args[keys_at + 1..]
            .iter()
            .filter_map(|k| self.nodes[me].slot_of(k).map(|slot| (k.clone(), slot)))
            .collect();
        if keys.is_empty() {
            return RespValue::simple("NOKEY");
        }
        if !replace {
            for (key, slot) in &keys {
                if self.nodes[target]
                    .keys
                    .get(slot)
                    .is_some_and(|k| k.contains(key))
                {
                    return RespValue::error("BUSYKEY Target key name already exists.");
                }
            }
        }
        for (key, slot) in keys {
            if let Some(set) = self.nodes[me].keys.get_mut(&slot) {
                set.remove(&key);
                if set.is_empty() {
                    self.nodes[me].keys.remove(&slot);
                }
            }
            self.nodes[target].keys.entry(slot).or_default().insert(key);
        }
        RespValue::simple("OK")
    }
}

/// Shared in-memory cluster; cloning shares the state
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<State>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_master(&self, id: &str, addr: &str, slots: impl IntoIterator<Item = Slot>) {
        self.state.lock().nodes.push(MockNode {
            id: id.to_string(),
            addr: addr.to_string(),
            master: true,
            slots: slots.into_iter().collect(),
            cluster_enabled: true,
            ..Default::default()
        });
    }

    pub fn add_replica(&self, id: &str, addr: &str, master: &str) {
        self.state.lock().nodes.push(MockNode {
            id: id.to_string(),
            addr: addr.to_string(),
            master: false,
            replicate_of: Some(master.to_string()),
            cluster_enabled: true,
            ..Default::default()
        });
    }

    /// Three masters covering the whole slot space, `a` `b` `c` on ports 7000-7002
    pub fn three_masters() -> Self {
        let cluster = Self::new();
        cluster.add_master("a0000000", "127.0.0.1:7000", 0..=5460);
        cluster.add_master("b0000000", "127.0.0.1:7001", 5461..=10922);
        cluster.add_master("c0000000", "127.0.0.1:7002", 10923..=16383);
        cluster
    }

    pub fn with_node<R>(&self, id: &str, f: impl FnOnce(&mut MockNode) -> R) -> R {
        let mut state = self.state.lock();
        let idx = state
            .by_id(id)
            .unwrap_or_else(|| panic!("no mock node {}", id));
        f(&mut state.nodes[idx])
    }

    pub fn node(&self, id: &str) -> MockNode {
        self.with_node(id, |n| n.clone())
    }

    pub fn put_keys(&self, id: &str, slot: Slot, keys: &[&str]) {
        self.with_node(id, |n| {
            n.keys
                .entry(slot)
                .or_default()
                .extend(keys.iter().map(|k| k.to_string()))
        });
    }

    pub fn key_count(&self, id: &str, slot: Slot) -> usize {
        self.with_node(id, |n| n.key_count(slot))
    }

    pub fn set_unreachable(&self, addr: &str) {
        self.state.lock().unreachable.insert(addr.to_string());
    }

    pub fn set_reachable(&self, addr: &str) {
        self.state.lock().unreachable.remove(addr);
    }

    /// Every node drops the connection on commands starting with `prefix`
    pub fn fail_command(&self, prefix: &str) {
        self.state.lock().failing.insert(prefix.to_ascii_uppercase());
    }

    pub fn heal_commands(&self) {
        self.state.lock().failing.clear();
    }

    /// `observer` reports `slots` for `peer` during its next `polls` answers
    pub fn stale_view(&self, observer: &str, peer: &str, slots: BTreeSet<Slot>, polls: u32) {
        self.state.lock().stale.insert(
            observer.to_string(),
            StaleView {
                peer: peer.to_string(),
                slots,
                remaining: polls,
            },
        );
    }

    /// Every command received so far as `addr: ARGS`
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .map(|(addr, cmd)| format!("{}: {}", addr, cmd))
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn connect(&self, addr: &str) -> Result<Box<dyn NodeClient>, ClientError> {
        let state = self.state.lock();
        if state.unreachable.contains(addr) || state.by_addr(addr).is_none() {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused: {}", addr),
            )));
        }
        Ok(Box::new(MockClient {
            addr: addr.to_string(),
            state: self.state.clone(),
        }))
    }
}

pub struct MockClient {
    addr: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl NodeClient for MockClient {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&mut self, args: Vec<Bytes>) -> Result<RespValue, ClientError> {
        let args: Vec<String> = args
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        let line = args.join(" ");
        let mut state = self.state.lock();
        state.log.push((self.addr.clone(), line.clone()));
        if state.unreachable.contains(&self.addr) {
            return Err(ClientError::Closed);
        }
        let upper = line.to_ascii_uppercase();
        if state.failing.iter().any(|prefix| upper.starts_with(prefix)) {
            return Err(ClientError::Closed);
        }
        let Some(me) = state.by_addr(&self.addr) else {
            return Err(ClientError::Closed);
        };
        Ok(state.execute(me, &args))
    }
}
