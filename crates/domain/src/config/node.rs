use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node side
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where node adapters find the controller and how they redial it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "d_server")]
    pub server: String,
    #[serde(default = "d_5326")]
    pub port: u16,
    #[serde(default = "ReconnectConfig::for_nodes")]
    pub reconnect: ReconnectConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server: d_server(),
            port: d_5326(),
            reconnect: ReconnectConfig::for_nodes(),
        }
    }
}

impl NodeConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

/// Exponential back-off parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "d_factor")]
    pub factor: f64,
    /// Standard deviation of the jitter as a fraction of the delay.
    #[serde(default = "d_jitter")]
    pub jitter: f64,
    /// Give up after this many consecutive retries.  `None` retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: d_initial_delay_ms(),
            max_delay_secs: d_max_delay_secs(),
            factor: d_factor(),
            jitter: d_jitter(),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Node clients redial the controller quickly: capped at 10s, growing
    /// by the golden ratio.
    pub fn for_nodes() -> Self {
        Self {
            max_delay_secs: 10,
            factor: 1.618_033_988_749_895,
            ..Self::default()
        }
    }
}

fn d_server() -> String {
    "localhost".into()
}
fn d_5326() -> u16 {
    5326
}
fn d_initial_delay_ms() -> u64 {
    1000
}
fn d_max_delay_secs() -> u64 {
    3600
}
fn d_factor() -> f64 {
    std::f64::consts::E
}
fn d_jitter() -> f64 {
    0.119_626_564_72
}
