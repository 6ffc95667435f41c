//! Registration records of every known node, connected or not.
//!
//! A record is created by the first successful registration (or up front for
//! nodes listed in `[server].nodes`) and survives disconnects, so the node's
//! identity and last health stay visible while it is away.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lu_domain::{State, Status};
use lu_node_sdk::Link;
use lu_protocol::Registration;
use parking_lot::RwLock;
use serde::Serialize;

use crate::server::RegistryError;

/// One node as known to the controller.
pub struct NodeRecord {
    pub name: String,
    pub node_id: Option<String>,
    pub hostname: Option<String>,
    pub host_id: Option<String>,
    pub module: Option<String>,
    /// Fully qualified commands routed to this node.
    pub commands: Vec<String>,
    /// Fully qualified events this node may emit.
    pub events: Vec<String>,
    /// Current connection.
    pub link: Option<Link>,
    /// Health reported by the node itself.
    pub status: Status,
    /// Link health captured when the last connection went away.
    pub last_link: (State, Option<String>),
    /// Connection counter of the current (or last) connection.
    pub sequence: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl NodeRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            node_id: None,
            hostname: None,
            host_id: None,
            module: None,
            commands: Vec::new(),
            events: Vec::new(),
            link: None,
            status: Status::new(name),
            last_link: (State::Off, None),
            sequence: 0,
            connected_at: None,
            last_activity: None,
        }
    }

    /// Registered over a live connection.
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.is_closed())
    }
}

/// Summary returned by list endpoints and the `_info` command.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub nodeid: Option<String>,
    pub hostname: Option<String>,
    pub hostid: Option<String>,
    pub module: Option<String>,
    pub sequence: u64,
    pub status: State,
    pub status_why: Option<String>,
    pub link: State,
    pub link_why: Option<String>,
    pub commands: Vec<String>,
    pub events: Vec<String>,
    pub connected: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Thread-safe registry of node records keyed by node name.
///
/// Under the registry lock a link is only compared or checked for closure.
/// Other link methods run outside it: a link's status callbacks may run into
/// the server, which reads this registry.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, NodeRecord>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with disconnected records for `names`.
    pub fn with_expected<'a>(names: impl IntoIterator<Item = &'a String>) -> Self {
        let nodes = names
            .into_iter()
            .map(|n| (n.clone(), NodeRecord::new(n)))
            .collect();
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Bind `registration` to `link`.  Fails if another live connection
    /// already holds the name.  Previous commands and events of the record
    /// are replaced.
    pub fn claim(
        &self,
        registration: &Registration,
        commands: Vec<String>,
        events: Vec<String>,
        link: &Link,
        sequence: u64,
    ) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write();
        if let Some(other) = nodes.get(&registration.node) {
            if other.is_connected() && !other.link.as_ref().is_some_and(|l| l.same(link)) {
                return Err(RegistryError::NodeTaken {
                    name: registration.node.clone(),
                    hostname: other.hostname.clone().unwrap_or_default(),
                    hostid: other.host_id.clone().unwrap_or_default(),
                });
            }
        }

        let record = nodes
            .entry(registration.node.clone())
            .or_insert_with(|| NodeRecord::new(&registration.node));
        record.node_id = Some(registration.nodeid.clone());
        record.hostname = Some(registration.hostname.clone());
        record.host_id = Some(registration.hostid.clone());
        record.module = Some(registration.module.clone());
        record.commands = commands;
        record.events = events;
        record.link = Some(link.clone());
        record.sequence = sequence;
        let now = Utc::now();
        record.connected_at = Some(now);
        record.last_activity = Some(now);

        tracing::info!(
            node = %registration.node,
            nodeid = %registration.nodeid,
            module = %registration.module,
            hostname = %registration.hostname,
            hostid = %registration.hostid,
            events = record.events.len(),
            commands = record.commands.len(),
            sequence,
            "node registered"
        );
        Ok(())
    }

    /// Detach `link` from node `name`.  Returns the commands and events to
    /// de-register; `None` if `link` is not the node's current connection,
    /// which makes repeated cleanup a no-op.
    pub fn release(&self, name: &str, link: &Link) -> Option<(Vec<String>, Vec<String>)> {
        let last_link = link.status();
        let mut nodes = self.nodes.write();
        let record = nodes.get_mut(name)?;
        if !record.link.as_ref().is_some_and(|l| l.same(link)) {
            return None;
        }
        record.link = None;
        record.last_link = last_link;
        record.status.set_off(None);
        tracing::info!(node = %name, "node released");
        Some((
            std::mem::take(&mut record.commands),
            std::mem::take(&mut record.events),
        ))
    }

    /// Current open connection of node `name`.
    pub fn link(&self, name: &str) -> Option<Link> {
        let link = self.nodes.read().get(name).and_then(|r| r.link.clone());
        link.filter(|l| !l.is_closed())
    }

    /// Update the last_activity timestamp.
    pub fn touch(&self, name: &str) {
        if let Some(record) = self.nodes.write().get_mut(name) {
            record.last_activity = Some(Utc::now());
        }
    }

    /// Record a node-reported status.  Returns `true` if it changed.
    pub fn set_status(&self, name: &str, state: State, reason: Option<&str>) -> bool {
        self.nodes
            .write()
            .get_mut(name)
            .is_some_and(|r| r.status.set(state, reason))
    }

    /// Node-reported status of `name`.
    pub fn status(&self, name: &str) -> Option<(State, Option<String>)> {
        self.nodes
            .read()
            .get(name)
            .map(|r| (r.status.state(), r.status.reason().map(str::to_string)))
    }

    /// Every node status and link status, for aggregation.
    pub fn health(&self) -> Vec<Status> {
        let snapshot: Vec<(String, State, Option<String>, Option<Link>, (State, Option<String>))> =
            self.nodes
                .read()
                .values()
                .map(|r| {
                    (
                        r.name.clone(),
                        r.status.state(),
                        r.status.reason().map(str::to_string),
                        r.link.clone(),
                        r.last_link.clone(),
                    )
                })
                .collect();

        let mut health = Vec::with_capacity(snapshot.len() * 2);
        for (name, state, reason, link, last_link) in snapshot {
            let (link_state, link_reason) = link.map_or(last_link, |l| l.status());
            health.push(Status::with_state(name.clone(), state, reason));
            health.push(Status::with_state(format!("{name}:link"), link_state, link_reason));
        }
        health
    }

    /// List all known nodes, sorted by name.
    pub fn list(&self) -> Vec<NodeInfo> {
        let snapshot: Vec<(NodeInfo, Option<Link>)> = self
            .nodes
            .read()
            .values()
            .map(|r| {
                let info = NodeInfo {
                    name: r.name.clone(),
                    nodeid: r.node_id.clone(),
                    hostname: r.hostname.clone(),
                    hostid: r.host_id.clone(),
                    module: r.module.clone(),
                    sequence: r.sequence,
                    status: r.status.state(),
                    status_why: r.status.reason().map(str::to_string),
                    link: r.last_link.0,
                    link_why: r.last_link.1.clone(),
                    commands: r.commands.clone(),
                    events: r.events.clone(),
                    connected: false,
                    connected_at: r.connected_at,
                    last_activity: r.last_activity,
                };
                (info, r.link.clone())
            })
            .collect();

        let mut list: Vec<NodeInfo> = snapshot
            .into_iter()
            .map(|(mut info, link)| {
                if let Some(link) = link {
                    let (state, reason) = link.status();
                    info.link = state;
                    info.link_why = reason;
                    info.connected = !link.is_closed();
                }
                info
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Host ids of every registered node, deduplicated.
    pub fn host_ids(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .nodes
            .read()
            .values()
            .filter_map(|r| r.host_id.clone())
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Number of nodes with a live connection.
    pub fn connected(&self) -> usize {
        let links: Vec<Link> = self
            .nodes
            .read()
            .values()
            .filter_map(|r| r.link.clone())
            .collect();
        links.iter().filter(|l| !l.is_closed()).count()
    }
}
