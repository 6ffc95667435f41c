//! Node listing endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /v1/nodes: every known node, connected or not.
pub async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let nodes = state.server.nodes().list();
    Json(serde_json::json!({
        "nodes": nodes,
        "count": nodes.len(),
    }))
}

/// GET /v1/nodes/:name
pub async fn get_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.server.nodes().list().into_iter().find(|n| n.name == name) {
        Some(node) => Json(serde_json::json!(node)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown node '{name}'") })),
        )
            .into_response(),
    }
}
