use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/health: server and aggregate node status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let server = &state.server;
    let (status, status_why) = server.status();
    let (node_status, node_status_why) = server.node_status();
    Json(serde_json::json!({
        "hostname": server.hostname(),
        "version": env!("CARGO_PKG_VERSION"),
        "status": status,
        "status_why": status_why,
        "node_status": node_status,
        "node_status_why": node_status_why,
        "nodes": server.nodes().len(),
        "connected": server.nodes().connected(),
    }))
}
