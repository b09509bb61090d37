// ABOUTME: HTTP API layer for devbox providing REST endpoints and routing
// ABOUTME: Thin translation between JSON requests and the sandbox services

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use devbox_sandbox::{CommandExecutor, SandboxManager, SandboxQueries};

pub mod command_handlers;
pub mod health;
pub mod response;
pub mod sandbox_handlers;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxManager>,
    pub executor: Arc<CommandExecutor>,
    pub queries: Arc<SandboxQueries>,
}

impl AppState {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        let queries = SandboxQueries::new(Arc::clone(manager.store()));
        let executor = CommandExecutor::new(Arc::clone(&manager));
        Self {
            manager,
            executor: Arc::new(executor),
            queries: Arc::new(queries),
        }
    }
}

/// Creates the sandboxes API router (nested under /api/sandboxes)
pub fn create_sandboxes_router() -> Router<AppState> {
    Router::new()
        .route("/", post(sandbox_handlers::create_sandbox))
        .route("/{id}", get(sandbox_handlers::get_sandbox))
        .route("/{id}/stop", post(sandbox_handlers::stop_sandbox))
        // Command endpoints
        .route(
            "/{id}/commands",
            post(command_handlers::execute_command).get(command_handlers::list_commands),
        )
}

/// Creates the sessions API router (nested under /api/sessions)
pub fn create_sessions_router() -> Router<AppState> {
    Router::new()
        .route(
            "/{session_id}/sandbox",
            get(sandbox_handlers::get_user_sandbox),
        )
        .route(
            "/{session_id}/sandboxes",
            get(sandbox_handlers::list_session_sandboxes),
        )
}

/// Full API router with state attached
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .nest("/api/sandboxes", create_sandboxes_router())
        .nest("/api/sessions", create_sessions_router())
        .route("/api/commands/{id}", get(command_handlers::get_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
