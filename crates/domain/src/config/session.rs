use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node session protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a session does with a line it cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Log and discard the line, keep the connection.
    #[default]
    Drop,
    /// Log and close the connection.
    Close,
}

/// Timing and framing limits shared by both ends of a node session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time a peer has to answer a command.
    #[serde(default = "d_10")]
    pub command_timeout_secs: u64,
    /// Interval between keepalive blank lines sent by nodes.
    #[serde(default = "d_60")]
    pub keepalive_interval_secs: u64,
    /// Controller drops a node silent for longer than this.  Must exceed
    /// the keepalive interval.
    #[serde(default = "d_180")]
    pub node_timeout_secs: u64,
    /// Longest accepted line.
    #[serde(default = "d_max_line")]
    pub max_line_bytes: usize,
    #[serde(default)]
    pub malformed: MalformedPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: d_10(),
            keepalive_interval_secs: d_60(),
            node_timeout_secs: d_180(),
            max_line_bytes: d_max_line(),
            malformed: MalformedPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }
}

fn d_10() -> u64 {
    10
}
fn d_60() -> u64 {
    60
}
fn d_180() -> u64 {
    180
}
fn d_max_line() -> usize {
    64 * 1024
}
