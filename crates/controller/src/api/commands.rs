//! Command and event endpoints: list the tables, run a command, inject an
//! event.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use lu_protocol::Message;
use serde::Deserialize;
use serde_json::Value;

use super::outcome_response;
use crate::state::AppState;

/// Body of the POST endpoints.  Missing or empty bodies mean no arguments.
#[derive(Debug, Default, Deserialize)]
pub struct ArgsBody {
    #[serde(default)]
    pub args: Vec<Value>,
}

/// GET /v1/commands
pub async fn list_commands(State(state): State<AppState>) -> impl IntoResponse {
    let commands = state.server.command_names();
    Json(serde_json::json!({
        "count": commands.len(),
        "commands": commands,
    }))
}

/// GET /v1/events
pub async fn list_events(State(state): State<AppState>) -> impl IntoResponse {
    let events = state.server.event_names();
    Json(serde_json::json!({
        "count": events.len(),
        "events": events,
    }))
}

/// POST /v1/commands/*name: run a command strictly and wait for its
/// outcome.
pub async fn run_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<ArgsBody>>,
) -> impl IntoResponse {
    let args = body.map(|Json(b)| b.args).unwrap_or_default();
    let command = Message::command(name, args);
    tracing::info!(command = %command, "http command");
    outcome_response(state.server.run_command(&command, true).await)
}

/// POST /v1/events/*name: hand an event to the rule engine as if a node
/// had emitted it.
pub async fn inject_event(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<ArgsBody>>,
) -> impl IntoResponse {
    let args = body.map(|Json(b)| b.args).unwrap_or_default();
    let event = Message::event(name, args);
    tracing::info!(event = %event, "http event");
    outcome_response(state.server.handle_event(event).await)
}
