pub mod commands;
pub mod health;
pub mod nodes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use lu_domain::{CommandError, CommandResult};

use crate::state::AppState;

/// Build the HTTP status API router.
///
/// Command and event names contain `/`, so their routes use wildcard
/// captures.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/nodes", get(nodes::list_nodes))
        .route("/v1/nodes/:name", get(nodes::get_node))
        .route("/v1/commands", get(commands::list_commands))
        .route("/v1/commands/*name", post(commands::run_command))
        .route("/v1/events", get(commands::list_events))
        .route("/v1/events/*name", post(commands::inject_event))
}

/// HTTP status for a failed command.
pub fn error_status(e: &CommandError) -> StatusCode {
    match e {
        CommandError::UnknownCommand(_) => StatusCode::NOT_FOUND,
        CommandError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CommandError::NoConnection => StatusCode::SERVICE_UNAVAILABLE,
        CommandError::Parse(_) | CommandError::CommandParse(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// JSON body for a command outcome.
pub fn outcome_response(outcome: CommandResult) -> Response {
    match outcome {
        Ok(result) => Json(serde_json::json!({
            "ok": true,
            "result": result,
        }))
        .into_response(),
        Err(e) => (
            error_status(&e),
            Json(serde_json::json!({
                "ok": false,
                "error": e.tag(),
                "message": e.detail(),
            })),
        )
            .into_response(),
    }
}
