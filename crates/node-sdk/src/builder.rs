//! Builder pattern for constructing a [`NodeClient`].

use std::time::Duration;

use lu_domain::config::{MalformedPolicy, NodeConfig, ReconnectConfig, SessionConfig};

use crate::client::{local_hostname, Identity, NodeClient, NodeHandle};
use crate::types::NodeSdkError;

/// Fluent builder for [`NodeClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use lu_node_sdk::NodeClientBuilder;
/// let client = NodeClientBuilder::new()
///     .server("controller.local:5326")
///     .name("oppo")
///     .module(env!("CARGO_PKG_NAME"))
///     .token_from_env("LUMINA_NODE_TOKEN")
///     .build()
///     .unwrap();
/// ```
pub struct NodeClientBuilder {
    addr: String,
    name: String,
    module: String,
    hostname: Option<String>,
    token: Option<String>,
    keepalive_interval: Duration,
    command_timeout: Duration,
    reconnect: ReconnectConfig,
    max_line_bytes: usize,
    malformed: MalformedPolicy,
    max_concurrent_commands: usize,
    max_queued_events: usize,
}

impl NodeClientBuilder {
    pub fn new() -> Self {
        let node = NodeConfig::default();
        let session = SessionConfig::default();
        Self {
            addr: node.addr(),
            name: String::new(),
            module: "lu-node".into(),
            hostname: None,
            token: None,
            keepalive_interval: session.keepalive_interval(),
            command_timeout: session.command_timeout(),
            reconnect: node.reconnect,
            max_line_bytes: session.max_line_bytes,
            malformed: session.malformed,
            max_concurrent_commands: 16,
            max_queued_events: 1000,
        }
    }

    /// Take server address and reconnect policy from `[node]`, timings and
    /// limits from `[session]`.
    pub fn from_config(node: &NodeConfig, session: &SessionConfig) -> Self {
        Self::new()
            .server(node.addr())
            .reconnect(node.reconnect.clone())
            .keepalive_interval(session.keepalive_interval())
            .command_timeout(session.command_timeout())
            .max_line_bytes(session.max_line_bytes)
            .malformed(session.malformed)
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Controller address, `host:port`.
    pub fn server(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Node name; namespace of its commands and events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // ── Identity / metadata ──────────────────────────────────────────

    /// Adapter module reported at registration.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Override the detected host name.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Shared token sent with the registration.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Read the token from `var` if set and non-empty.
    pub fn token_from_env(mut self, var: &str) -> Self {
        if let Ok(token) = std::env::var(var) {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override the keepalive interval (default 60s).
    pub fn keepalive_interval(mut self, d: Duration) -> Self {
        self.keepalive_interval = d;
        self
    }

    /// Time the controller has to answer our commands, and our handlers
    /// have to answer the controller's (default 10s).
    pub fn command_timeout(mut self, d: Duration) -> Self {
        self.command_timeout = d;
        self
    }

    /// Override the reconnect policy.
    pub fn reconnect(mut self, cfg: ReconnectConfig) -> Self {
        self.reconnect = cfg;
        self
    }

    pub fn malformed(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }

    /// Maximum concurrent command executions (default 16).
    pub fn max_concurrent_commands(mut self, n: usize) -> Self {
        self.max_concurrent_commands = n;
        self
    }

    /// Events kept while disconnected before the oldest is dropped
    /// (default 1000).
    pub fn max_queued_events(mut self, n: usize) -> Self {
        self.max_queued_events = n;
        self
    }

    // ── Wire limits ──────────────────────────────────────────────────

    /// Longest accepted inbound line (default 64 KiB).
    pub fn max_line_bytes(mut self, n: usize) -> Self {
        self.max_line_bytes = n;
        self
    }

    /// Build the [`NodeClient`].
    pub fn build(self) -> Result<NodeClient, NodeSdkError> {
        if self.addr.is_empty() {
            return Err(NodeSdkError::Config("server address is required".into()));
        }
        if self.name.is_empty() {
            return Err(NodeSdkError::Config("node name is required".into()));
        }
        if self.name.contains(['/', '{', '}', ',']) {
            return Err(NodeSdkError::Config(format!(
                "node name '{}' must not contain '/', '{{', '}}' or ','",
                self.name
            )));
        }
        if self.max_concurrent_commands == 0 {
            return Err(NodeSdkError::Config(
                "max_concurrent_commands must be greater than 0".into(),
            ));
        }

        let hostname = self.hostname.unwrap_or_else(local_hostname);
        let hostid = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_DNS, hostname.as_bytes()).to_string();
        let identity = Identity {
            nodeid: uuid::Uuid::new_v4().to_string(),
            hostid,
            hostname,
            module: self.module,
            name: self.name.clone(),
        };

        Ok(NodeClient {
            addr: self.addr,
            identity,
            token: self.token,
            keepalive_interval: self.keepalive_interval,
            command_timeout: self.command_timeout,
            reconnect: self.reconnect,
            max_line_bytes: self.max_line_bytes,
            malformed: self.malformed,
            max_concurrent_commands: self.max_concurrent_commands,
            handle: NodeHandle::new(self.name, self.max_queued_events),
        })
    }
}

impl Default for NodeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
