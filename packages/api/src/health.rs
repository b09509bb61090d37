// ABOUTME: Health endpoint reporting service version and compute backend reachability
// ABOUTME: Always answers 200 so load balancers can tell the API apart from the backend

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let backend_available = match state.manager.check_backend().await {
        Ok(available) => available,
        Err(e) => {
            warn!(error = %e, "Backend health check failed");
            false
        }
    };

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.manager.backend().name(),
        "backend_available": backend_available,
    }))
}
