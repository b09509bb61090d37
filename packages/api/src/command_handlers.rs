// ABOUTME: HTTP request handlers for command execution and history
// ABOUTME: Commands are queued with 202 and observed through the lookup endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::response::{ok, with_status, ApiResult};
use crate::AppState;

/// Request body for running a command
#[derive(Debug, Deserialize)]
pub struct ExecuteCommandBody {
    pub command: String,
}

/// Queue a command against an active sandbox
///
/// POST /api/sandboxes/{id}/commands
pub async fn execute_command(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
    body: Result<Json<ExecuteCommandBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    info!(sandbox_id = %sandbox_id, "Executing command");

    let command = state
        .executor
        .execute_command(&sandbox_id, &body.command)
        .await?;
    Ok(with_status(StatusCode::ACCEPTED, command))
}

/// Command history of a sandbox, newest first
///
/// GET /api/sandboxes/{id}/commands
pub async fn list_commands(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
) -> ApiResult {
    let commands = state.queries.get_sandbox_commands(&sandbox_id).await?;
    Ok(ok(commands))
}

/// GET /api/commands/{id}
pub async fn get_command(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let command = state.queries.get_command(&id).await?;
    Ok(ok(command))
}
