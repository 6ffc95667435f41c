use std::sync::Arc;

use lu_domain::config::Config;
use tokio_util::sync::CancellationToken;

use crate::server::Server;

/// Shared application state passed to the HTTP handlers and the node
/// listener.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Command and event tables, node registry and health.
    pub server: Arc<Server>,
    /// Fires once on shutdown; background loops and sessions stop with it.
    pub shutdown: CancellationToken,
}
