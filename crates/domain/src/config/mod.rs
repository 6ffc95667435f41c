mod node;
mod observability;
mod responder;
mod server;
mod session;

pub use node::*;
pub use observability::*;
pub use responder::*;
pub use server::*;
pub use session::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Look up a resolved setting as JSON.
    ///
    /// `key` is a dotted path (`"session.node_timeout_secs"`).  With a
    /// `namespace`, the key is looked up under that section first and then
    /// at the top level, so `get("port", Some("node"))` yields `node.port`.
    pub fn get(&self, key: &str, namespace: Option<&str>) -> Option<serde_json::Value> {
        let root = serde_json::to_value(self).ok()?;
        if let Some(ns) = namespace {
            let scoped = format!("{ns}.{key}");
            if let Some(v) = lookup(&root, &scoped) {
                return Some(v.clone());
            }
        }
        lookup(&root, key).cloned()
    }
}

fn lookup<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .filter(|p| !p.is_empty())
        .try_fold(root, |node, part| node.get(part))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.http_port.is_some() && self.server.http_port == Some(self.server.port) {
            errors.push(ConfigError::error(
                "server.http_port",
                "http_port must differ from the node session port",
            ));
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        // Session timings.
        if self.session.command_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "session.command_timeout_secs",
                "command timeout must be greater than 0",
            ));
        }
        if self.session.node_timeout_secs <= self.session.keepalive_interval_secs {
            errors.push(ConfigError::error(
                "session.node_timeout_secs",
                "node timeout must exceed the keepalive interval",
            ));
        }
        if self.session.max_line_bytes < 1024 {
            errors.push(ConfigError::warning(
                "session.max_line_bytes",
                "line limit below 1 KiB will reject most registrations",
            ));
        }

        // Reconnect policy.
        let rc = &self.node.reconnect;
        if rc.factor < 1.0 {
            errors.push(ConfigError::error(
                "node.reconnect.factor",
                "factor must be at least 1.0",
            ));
        }
        if rc.jitter < 0.0 {
            errors.push(ConfigError::error(
                "node.reconnect.jitter",
                "jitter must not be negative",
            ));
        }
        if rc.initial_delay_ms > rc.max_delay_secs.saturating_mul(1000) {
            errors.push(ConfigError::warning(
                "node.reconnect.initial_delay_ms",
                "initial delay exceeds max delay",
            ));
        }

        // Responder tables.
        if self.responder.max_depth == 0 {
            errors.push(ConfigError::error(
                "responder.max_depth",
                "max_depth must be greater than 0",
            ));
        }
        for (event, spec) in &self.responder.actions {
            let empty = match spec {
                ActionSpec::Single(t) => t.trim().is_empty(),
                ActionSpec::List(l) => l.is_empty(),
            };
            if empty {
                errors.push(ConfigError::warning(
                    format!("responder.actions.{event}"),
                    "action has no command",
                ));
            }
        }
        for (name, templates) in &self.responder.groups {
            if templates.iter().any(|t| t.trim().is_empty()) {
                errors.push(ConfigError::error(
                    format!("responder.groups.{name}"),
                    "group contains an empty command template",
                ));
            }
            if name.starts_with("__") {
                errors.push(ConfigError::warning(
                    format!("responder.groups.{name}"),
                    "names starting with \"__\" are reserved for list actions",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be within 0.0..=1.0",
            ));
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 5400
        nodes = ["oppo"]

        [session]
        command_timeout_secs = 5

        [node]
        server = "hub.local"

        [responder.actions]
        "oppo/started" = ["hw50/on", "oppo/play"]
    "#;

    #[test]
    fn default_config_validates_cleanly() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn parses_all_sections() {
        let cfg = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.server.port, 5400);
        assert_eq!(cfg.session.command_timeout_secs, 5);
        assert_eq!(cfg.session.node_timeout_secs, 180);
        assert_eq!(cfg.node.server, "hub.local");
        assert_eq!(cfg.responder.actions.len(), 1);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = Config::from_toml("[server\nport = ").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn get_resolves_dotted_keys() {
        let cfg = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(
            cfg.get("session.command_timeout_secs", None),
            Some(serde_json::json!(5))
        );
        assert_eq!(cfg.get("server.nodes", None), Some(serde_json::json!(["oppo"])));
        assert_eq!(cfg.get("nope.missing", None), None);
    }

    #[test]
    fn get_prefers_namespace_then_falls_back() {
        let cfg = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.get("port", Some("node")), Some(serde_json::json!(5326)));
        assert_eq!(cfg.get("port", Some("server")), Some(serde_json::json!(5400)));
        assert_eq!(
            cfg.get("session.keepalive_interval_secs", Some("node")),
            Some(serde_json::json!(60))
        );
    }

    #[test]
    fn validate_flags_short_node_timeout() {
        let mut cfg = Config::default();
        cfg.session.node_timeout_secs = 30;
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "session.node_timeout_secs" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn validate_flags_port_clash_and_depth() {
        let mut cfg = Config::default();
        cfg.server.http_port = Some(cfg.server.port);
        cfg.responder.max_depth = 0;
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"server.http_port".to_string()));
        assert!(fields.contains(&"responder.max_depth".to_string()));
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::warning("server.cors.allowed_origins", "wildcard");
        assert_eq!(e.to_string(), "[WARN] server.cors.allowed_origins: wildcard");
    }
}
