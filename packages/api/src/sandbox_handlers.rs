// ABOUTME: HTTP request handlers for sandbox lifecycle operations
// ABOUTME: Create, stop and look up sandboxes by id or by session

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::response::{ok, with_status, ApiResult};
use crate::AppState;
use devbox_sandbox::{CreateSandboxRequest, Runtime, SandboxError};

/// Request body for creating a sandbox
#[derive(Debug, Deserialize)]
pub struct CreateSandboxBody {
    #[serde(alias = "user_session_id")]
    pub session_id: String,
    #[serde(alias = "github_repo_url")]
    pub repo_url: String,
    pub runtime: String,
    pub vcpus: u32,
}

impl TryFrom<CreateSandboxBody> for CreateSandboxRequest {
    type Error = SandboxError;

    fn try_from(body: CreateSandboxBody) -> Result<Self, Self::Error> {
        let runtime = body
            .runtime
            .parse::<Runtime>()
            .map_err(SandboxError::Validation)?;
        Ok(CreateSandboxRequest {
            session_id: body.session_id,
            repo_url: body.repo_url,
            runtime,
            vcpus: body.vcpus,
        })
    }
}

/// Create a sandbox for a session, stopping the session's previous one
///
/// POST /api/sandboxes
pub async fn create_sandbox(
    State(state): State<AppState>,
    body: Result<Json<CreateSandboxBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    info!(session_id = %body.session_id, "Creating sandbox");

    let request = CreateSandboxRequest::try_from(body)?;
    let sandbox = state.manager.create_sandbox(request).await?;
    Ok(with_status(StatusCode::CREATED, sandbox))
}

/// GET /api/sandboxes/{id}
pub async fn get_sandbox(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let sandbox = state.queries.get_sandbox(&id).await?;
    Ok(ok(sandbox))
}

/// Stop a sandbox. Stopping an already stopped sandbox succeeds.
///
/// POST /api/sandboxes/{id}/stop
pub async fn stop_sandbox(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    info!(sandbox_id = %id, "Stopping sandbox");

    let sandbox = state.manager.stop_sandbox(&id).await?;
    Ok(ok(sandbox))
}

/// The session's current sandbox; `data` is null when there is none
///
/// GET /api/sessions/{session_id}/sandbox
pub async fn get_user_sandbox(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let sandbox = state.queries.get_user_sandbox(&session_id).await?;
    Ok(ok(sandbox))
}

/// GET /api/sessions/{session_id}/sandboxes
pub async fn list_session_sandboxes(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let sandboxes = state.queries.list_session_sandboxes(&session_id).await?;
    Ok(ok(sandboxes))
}
