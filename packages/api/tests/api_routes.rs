// ABOUTME: Router-level tests for the devbox HTTP API
// ABOUTME: Requests go through the full axum router backed by the in-memory store and mock backend

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use devbox_api::{create_router, AppState};
use devbox_sandbox::providers::MockBackend;
use devbox_sandbox::test_support::{wait_for_command, wait_for_status};
use devbox_sandbox::{MemoryStore, SandboxManager, SandboxSettings, SandboxStatus};

fn setup() -> (Router, AppState, Arc<MockBackend>) {
    let backend = Arc::new(MockBackend::new());
    let manager = Arc::new(SandboxManager::new(
        Arc::new(MemoryStore::new()),
        backend.clone(),
        SandboxSettings::default(),
    ));
    let state = AppState::new(manager);
    (create_router(state.clone()), state, backend)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn create_body(session: &str) -> Value {
    json!({
        "session_id": session,
        "repo_url": "https://github.com/a/b",
        "runtime": "nodejs",
        "vcpus": 2
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _, backend) = setup();

    let (status, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backend"], "mock");
    assert_eq!(body["backend_available"], true);

    backend.set_available(false);
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend_available"], false);
}

#[tokio::test]
async fn test_create_and_fetch_sandbox() {
    let (app, state, _) = setup();

    let (status, body) = send(&app, Method::POST, "/api/sandboxes", Some(create_body("s1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["error"], Value::Null);
    assert_eq!(body["data"]["status"], "creating");
    assert_eq!(body["data"]["runtime"], "nodejs");

    let id = body["data"]["id"].as_str().unwrap().to_string();
    wait_for_status(&state.manager, &id, SandboxStatus::Active).await;

    let (status, body) = send(&app, Method::GET, &format!("/api/sandboxes/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "active");
    assert!(body["data"]["public_url"].is_string());

    let (status, body) = send(&app, Method::GET, "/api/sessions/s1/sandbox", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());
}

#[tokio::test]
async fn test_create_accepts_legacy_field_names() {
    let (app, _, _) = setup();
    let body = json!({
        "user_session_id": "s1",
        "github_repo_url": "https://github.com/a/b",
        "runtime": "python",
        "vcpus": 1
    });

    let (status, body) = send(&app, Method::POST, "/api/sandboxes", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["session_id"], "s1");
    assert_eq!(body["data"]["runtime"], "python");
}

#[tokio::test]
async fn test_create_validation_errors() {
    let (app, _, _) = setup();

    let mut too_many = create_body("s1");
    too_many["vcpus"] = json!(9);
    let (status, body) = send(&app, Method::POST, "/api/sandboxes", Some(too_many)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"], Value::Null);

    let mut bad_runtime = create_body("s1");
    bad_runtime["runtime"] = json!("ruby");
    let (status, _) = send(&app, Method::POST, "/api/sandboxes", Some(bad_runtime)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::POST, "/api/sandboxes", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    // Nothing was created for the session
    let (_, body) = send(&app, Method::GET, "/api/sessions/s1/sandboxes", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_command_flow() {
    let (app, state, backend) = setup();
    backend.push_output("file1\n", "", 0).await;

    let (_, body) = send(&app, Method::POST, "/api/sandboxes", Some(create_body("s1"))).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    wait_for_status(&state.manager, &id, SandboxStatus::Active).await;

    let uri = format!("/api/sandboxes/{id}/commands");
    let (status, body) = send(&app, Method::POST, &uri, Some(json!({ "command": "ls -la" }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "pending");

    let command_id = body["data"]["id"].as_str().unwrap().to_string();
    wait_for_command(state.manager.store().as_ref(), &command_id).await;

    let (status, body) = send(&app, Method::GET, &format!("/api/commands/{command_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["output"], "file1\n");
    assert_eq!(body["data"]["exit_code"], 0);

    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::POST, &format!("/api/sandboxes/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "stopped");
    assert_eq!(body["data"]["public_url"], Value::Null);

    let (status, body) = send(&app, Method::POST, &uri, Some(json!({ "command": "ls" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Sandbox is not active. Current status: stopped");

    let (status, body) = send(&app, Method::GET, "/api/sessions/s1/sandbox", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], Value::Null);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let (app, _, _) = setup();

    let (status, _) = send(&app, Method::GET, "/api/sandboxes/sbx_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::POST, "/api/sandboxes/sbx_missing/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/sandboxes/sbx_missing/commands",
        Some(json!({ "command": "ls" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/commands/cmd_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // History of an unknown sandbox is simply empty
    let (status, body) = send(&app, Method::GET, "/api/sandboxes/sbx_missing/commands", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_command_while_creating_conflicts() {
    let (app, _, backend) = setup();
    backend.hold_provisioning();

    let (_, body) = send(&app, Method::POST, "/api/sandboxes", Some(create_body("s1"))).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/sandboxes/{id}/commands"),
        Some(json!({ "command": "ls" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Sandbox is not active. Current status: creating");

    backend.release_provisioning();
}

#[tokio::test]
async fn test_invalid_endpoint() {
    let (app, _, _) = setup();

    let (status, _) = send(&app, Method::GET, "/api/nonexistent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
