//! The node server: command and event tables, dispatch to node links, and
//! the server and aggregate node health.
//!
//! Routing rules for `run_command`:
//! 1. A name owned by a node is sent over that node's link with the
//!    `<node>/` prefix stripped, and completes with the node's reply.
//! 2. An alias is handed to the [`EventHandler`] that declared it.
//! 3. `_info`, `_server` and `_name` are answered by the server itself.
//! 4. Anything else is `UnknownCommand`, or a neutral success when the
//!    caller asked for leniency.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lu_domain::config::Config;
use lu_domain::{CommandError, CommandResult, State, Status};
use lu_node_sdk::Link;
use lu_protocol::{Message, Registration};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::nodes::registry::NodeRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate command '{0}'")]
    DuplicateCommand(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("duplicate event '{0}'")]
    DuplicateEvent(String),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("node '{name}' already taken by host {hostname} [{hostid}]")]
    NodeTaken {
        name: String,
        hostname: String,
        hostid: String,
    },
}

/// Where a command is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    /// Sent to the named node over its link.
    Node { node: String },
    /// Expanded by the event handler.
    Alias,
    /// Answered by the server.
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Controller info and the node list.
    Info,
    /// Server summary.
    Server,
    /// Controller host name.
    Name,
}

impl Builtin {
    pub const ALL: [(&'static str, Builtin); 3] = [
        ("_info", Builtin::Info),
        ("_server", Builtin::Server),
        ("_name", Builtin::Name),
    ];
}

/// Strategy for events accepted from nodes, injected at construction.
///
/// A handler may also own aliases: command names it expands itself.  The
/// server registers them at construction and routes them to
/// [`run_alias`](Self::run_alias).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, server: &Server, event: Message) -> CommandResult;

    /// Command names this handler expands.
    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run_alias(&self, server: &Server, command: Message) -> CommandResult {
        let _ = server;
        Err(CommandError::UnknownCommand(command.name))
    }
}

/// Default strategy: log and ignore.
pub struct IgnoreEvents;

#[async_trait]
impl EventHandler for IgnoreEvents {
    async fn handle_event(&self, _server: &Server, event: Message) -> CommandResult {
        tracing::info!(event = %event, "ignoring event");
        Ok(Value::Null)
    }
}

/// Command and event tables, mutated under one lock so a lookup sees
/// either all or none of a batch.
#[derive(Default)]
struct Tables {
    commands: HashMap<String, CommandTarget>,
    events: BTreeSet<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Server {
    config: Arc<Config>,
    hostname: String,
    node_token: Option<String>,
    tables: RwLock<Tables>,
    nodes: NodeRegistry,
    handler: Arc<dyn EventHandler>,
    status: Mutex<Status>,
    node_status: Mutex<Status>,
    status_changed: Arc<Notify>,
    connections: AtomicUsize,
    sequence: AtomicU64,
}

impl Server {
    /// Build the server with its built-in commands and the aliases of
    /// `handler`.  The node token is read from the environment variable
    /// named by `server.node_token_env`.
    pub fn new(config: Arc<Config>, handler: Arc<dyn EventHandler>) -> Result<Self, RegistryError> {
        let node_token = std::env::var(&config.server.node_token_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self::with_token(config, handler, node_token)
    }

    pub fn with_token(
        config: Arc<Config>,
        handler: Arc<dyn EventHandler>,
        node_token: Option<String>,
    ) -> Result<Self, RegistryError> {
        let server = Self {
            hostname: lu_node_sdk::local_hostname(),
            node_token,
            tables: RwLock::new(Tables::default()),
            nodes: NodeRegistry::with_expected(&config.server.nodes),
            handler: handler.clone(),
            status: Mutex::new(Status::new("server")),
            node_status: Mutex::new(Status::new("nodes")),
            status_changed: Arc::new(Notify::new()),
            connections: AtomicUsize::new(0),
            sequence: AtomicU64::new(1),
            config,
        };

        let builtins = Builtin::ALL
            .iter()
            .map(|(name, b)| (name.to_string(), CommandTarget::Builtin(*b)));
        server.add_commands(builtins)?;
        let aliases: Vec<(String, CommandTarget)> = handler
            .aliases()
            .into_iter()
            .map(|a| (a, CommandTarget::Alias))
            .collect();
        server.add_commands(aliases)?;
        server.refresh_node_status();
        Ok(server)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    // ── Tables ───────────────────────────────────────────────────────

    /// Add commands.  All-or-nothing: a duplicate (in the table or within
    /// the batch) fails and nothing is applied.
    pub fn add_commands(
        &self,
        commands: impl IntoIterator<Item = (String, CommandTarget)>,
    ) -> Result<(), RegistryError> {
        let commands: Vec<(String, CommandTarget)> = commands.into_iter().collect();
        let mut tables = self.tables.write();
        let mut seen = BTreeSet::new();
        for (name, _) in &commands {
            if tables.commands.contains_key(name) || !seen.insert(name.as_str()) {
                return Err(RegistryError::DuplicateCommand(name.clone()));
            }
        }
        tracing::info!(count = commands.len(), "registering commands");
        for (name, target) in commands {
            tracing::debug!(command = %name, "  + command");
            tables.commands.insert(name, target);
        }
        Ok(())
    }

    /// Remove commands.  All-or-nothing: an unregistered name fails.
    pub fn remove_commands(&self, names: &[String]) -> Result<(), RegistryError> {
        let mut tables = self.tables.write();
        if let Some(missing) = names.iter().find(|n| !tables.commands.contains_key(*n)) {
            return Err(RegistryError::UnknownCommand(missing.clone()));
        }
        tracing::info!(count = names.len(), "removing commands");
        for name in names {
            tracing::debug!(command = %name, "  - command");
            tables.commands.remove(name);
        }
        Ok(())
    }

    pub fn add_events(&self, names: &[String]) -> Result<(), RegistryError> {
        let mut tables = self.tables.write();
        let mut seen = BTreeSet::new();
        for name in names {
            if tables.events.contains(name) || !seen.insert(name.as_str()) {
                return Err(RegistryError::DuplicateEvent(name.clone()));
            }
        }
        tracing::info!(count = names.len(), "registering events");
        tables.events.extend(names.iter().cloned());
        Ok(())
    }

    pub fn remove_events(&self, names: &[String]) -> Result<(), RegistryError> {
        let mut tables = self.tables.write();
        if let Some(missing) = names.iter().find(|n| !tables.events.contains(*n)) {
            return Err(RegistryError::UnknownEvent(missing.clone()));
        }
        tracing::info!(count = names.len(), "removing events");
        for name in names {
            tables.events.remove(name);
        }
        Ok(())
    }

    pub fn command_target(&self, name: &str) -> Option<CommandTarget> {
        self.tables.read().commands.get(name).cloned()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.tables.read().events.contains(name)
    }

    /// Registered command names, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        self.tables.read().events.iter().cloned().collect()
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Run `command` and return its outcome.
    ///
    /// With `fail_on_unknown == false` an unregistered name and an
    /// unreachable node both resolve as a neutral `Ok(null)`.
    pub async fn run_command(&self, command: &Message, fail_on_unknown: bool) -> CommandResult {
        let Some(target) = self.command_target(&command.name) else {
            if fail_on_unknown {
                return Err(CommandError::UnknownCommand(command.name.clone()));
            }
            tracing::warn!(command = %command.name, "ignoring unknown command");
            return Ok(Value::Null);
        };

        let outcome = match target {
            CommandTarget::Node { node } => self.send_to_node(&node, command).await,
            CommandTarget::Alias => self.handler.run_alias(self, command.clone()).await,
            CommandTarget::Builtin(builtin) => Ok(self.builtin(builtin)),
        };

        match outcome {
            Err(e) if !fail_on_unknown && e.is_soft() => {
                tracing::info!(command = %command.name, error = %e, "tolerating failure");
                Ok(Value::Null)
            }
            other => other,
        }
    }

    /// Pass an accepted event to the event handler.
    pub async fn handle_event(&self, event: Message) -> CommandResult {
        self.handler.handle_event(self, event).await
    }

    async fn send_to_node(&self, node: &str, command: &Message) -> CommandResult {
        let Some(link) = self.nodes.link(node) else {
            return Err(CommandError::NoConnection);
        };
        let prefix = format!("{node}/");
        let local = command.name.strip_prefix(&prefix).unwrap_or(&command.name);
        link.send_command(command.renamed(local)).await
    }

    fn builtin(&self, builtin: Builtin) -> Value {
        match builtin {
            Builtin::Info => self.info(),
            Builtin::Server => self.server_info(),
            Builtin::Name => Value::String(self.hostname.clone()),
        }
    }

    /// Controller info with every known node.
    pub fn info(&self) -> Value {
        let (n_commands, n_events) = {
            let tables = self.tables.read();
            (tables.commands.len(), tables.events.len())
        };
        let (status, status_why) = self.status();
        let (node_status, node_status_why) = self.node_status();
        json!({
            "hostname": self.hostname,
            "version": env!("CARGO_PKG_VERSION"),
            "nodes": self.nodes.list(),
            "n_commands": n_commands,
            "n_events": n_events,
            "status": status,
            "status_why": status_why,
            "node_status": node_status,
            "node_status_why": node_status_why,
        })
    }

    /// Short server summary.
    pub fn server_info(&self) -> Value {
        let (n_commands, n_events) = {
            let tables = self.tables.read();
            (tables.commands.len(), tables.events.len())
        };
        let (status, status_why) = self.status();
        json!({
            "nodes": self.nodes.names(),
            "hosts": self.nodes.host_ids(),
            "n_commands": n_commands,
            "n_events": n_events,
            "status": status,
            "status_why": status_why,
        })
    }

    // ── Node lifecycle ───────────────────────────────────────────────

    /// Next connection sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Constant-time check of a registration token.  Always passes when no
    /// token is configured.
    pub fn check_token(&self, provided: Option<&str>) -> bool {
        match &self.node_token {
            None => true,
            Some(expected) => token_eq(provided.unwrap_or(""), expected),
        }
    }

    /// Register a node connected on `link`: claim its name, then add its
    /// events and commands.  On any failure nothing stays registered.
    pub fn register_node(
        &self,
        registration: &Registration,
        link: &Link,
        sequence: u64,
    ) -> Result<(), CommandError> {
        if !self.check_token(registration.token.as_deref()) {
            return Err(CommandError::Registration("invalid node token".into()));
        }
        let node = &registration.node;
        let commands = qualify_all(node, &registration.commands);
        let events = qualify_all(node, &registration.events);

        self.nodes
            .claim(registration, commands.clone(), events.clone(), link, sequence)
            .map_err(|e| CommandError::Registration(e.to_string()))?;

        let rollback = |e: RegistryError| {
            self.nodes.release(node, link);
            CommandError::Registration(e.to_string())
        };
        self.add_events(&events).map_err(rollback)?;
        let targets = commands
            .iter()
            .map(|c| (c.clone(), CommandTarget::Node { node: node.clone() }));
        if let Err(e) = self.add_commands(targets) {
            let _ = self.remove_events(&events);
            return Err(rollback(e));
        }

        link.set_status_name(format!("{node}:link"));
        self.mark_status_changed();
        Ok(())
    }

    /// Undo the registration bound to `link`.  Repeated calls, or a call
    /// with a link the node no longer uses, do nothing.
    pub fn unregister_node(&self, node: &str, link: &Link) {
        let Some((commands, events)) = self.nodes.release(node, link) else {
            return;
        };
        if let Err(e) = self.remove_commands(&commands) {
            tracing::warn!(node = %node, error = %e, "command cleanup");
        }
        if let Err(e) = self.remove_events(&events) {
            tracing::warn!(node = %node, error = %e, "event cleanup");
        }
        self.mark_status_changed();
    }

    /// Record a status reported by node `node`.
    pub fn set_node_status(&self, node: &str, state: State, reason: Option<&str>) {
        if self.nodes.set_status(node, state, reason) {
            self.mark_status_changed();
        }
    }

    // ── Health ───────────────────────────────────────────────────────

    pub fn status(&self) -> (State, Option<String>) {
        let status = self.status.lock();
        (status.state(), status.reason().map(str::to_string))
    }

    /// Combined health of every node and node link.
    pub fn node_status(&self) -> (State, Option<String>) {
        let status = self.node_status.lock();
        (status.state(), status.reason().map(str::to_string))
    }

    /// The listener is up.
    pub fn listening(&self) {
        self.status.lock().set_yellow(Some("Waiting for connections"));
    }

    /// The listener is gone.
    pub fn stopped(&self) {
        self.status.lock().set_off(None);
    }

    pub fn connection_made(&self) {
        self.connections.fetch_add(1, Ordering::AcqRel);
        self.status.lock().set_green(None);
    }

    pub fn connection_lost(&self) {
        if self.connections.fetch_sub(1, Ordering::AcqRel) <= 1 {
            self.status.lock().set_yellow(Some("No nodes connected"));
        }
    }

    /// Wake the status watcher.  Safe to call from status callbacks.
    pub fn mark_status_changed(&self) {
        self.status_changed.notify_one();
    }

    /// Handle for link status callbacks.
    pub fn status_notifier(&self) -> Arc<Notify> {
        self.status_changed.clone()
    }

    /// Recompute the aggregate node status.
    pub fn refresh_node_status(&self) {
        let health = self.nodes.health();
        let (state, reason) = Status::combine(&health);
        self.node_status.lock().set(state, reason.as_deref());
    }

    /// Recompute the aggregate node status whenever something changed,
    /// until `cancel` fires.
    pub fn spawn_status_watcher(self: &Arc<Self>, cancel: CancellationToken) {
        let server = Arc::downgrade(self);
        let notify = self.status_changed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = cancel.cancelled() => break,
                }
                match server.upgrade() {
                    Some(server) => server.refresh_node_status(),
                    None => break,
                }
            }
        });
    }
}

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

/// Prefix every name with `<node>/` unless it already is.
fn qualify_all(node: &str, names: &[String]) -> Vec<String> {
    let prefix = format!("{node}/");
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let qualified = if name.starts_with(&prefix) {
            name.clone()
        } else {
            format!("{prefix}{name}")
        };
        if !out.contains(&qualified) {
            out.push(qualified);
        }
    }
    out
}
