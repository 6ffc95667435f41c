use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the node session listener binds to.
    #[serde(default = "d_5326")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Port for the HTTP status API.  `None` disables it.
    #[serde(default = "d_http_port")]
    pub http_port: Option<u16>,
    /// Environment variable holding the shared node token.
    /// If the env var is unset, nodes register without a token.
    #[serde(default = "d_node_token_env")]
    pub node_token_env: String,
    /// Nodes expected to connect.  They are listed (as OFF) before they
    /// register, so the aggregate node status reflects missing devices.
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_5326(),
            host: d_host(),
            http_port: d_http_port(),
            node_token_env: d_node_token_env(),
            nodes: Vec::new(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5326() -> u16 {
    5326
}
fn d_http_port() -> Option<u16> {
    Some(5327)
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_node_token_env() -> String {
    "LUMINA_NODE_TOKEN".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
