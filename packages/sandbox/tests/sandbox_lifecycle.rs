// ABOUTME: End-to-end tests of the sandbox lifecycle against a migrated SQLite database
// ABOUTME: Drives the manager, executor, queries and reaper together with the scripted backend

use devbox_sandbox::providers::MockBackend;
use devbox_sandbox::reaper;
use devbox_sandbox::test_support::{wait_for_command, wait_for_status};
use devbox_sandbox::{
    CommandExecutor, CommandStatus, CreateSandboxRequest, ProvisionedSandbox, Runtime,
    SandboxError, SandboxManager, SandboxQueries, SandboxSettings, SandboxStatus, SandboxStore,
    SqliteSandboxStore,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    manager: Arc<SandboxManager>,
    executor: CommandExecutor,
    queries: SandboxQueries,
    backend: Arc<MockBackend>,
    store: Arc<dyn SandboxStore>,
    _dir: TempDir,
}

/// Helper to build the services over a fresh file-backed database
async fn setup_test_manager() -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("devbox.db").display());
    let pool = devbox_storage::connect_and_migrate(&url)
        .await
        .expect("Failed to open test database");

    let store: Arc<dyn SandboxStore> = Arc::new(SqliteSandboxStore::new(pool));
    let backend = Arc::new(MockBackend::new());
    let manager = Arc::new(SandboxManager::new(
        store.clone(),
        backend.clone(),
        SandboxSettings::default(),
    ));

    Harness {
        executor: CommandExecutor::new(manager.clone()),
        queries: SandboxQueries::new(store.clone()),
        manager,
        backend,
        store,
        _dir: dir,
    }
}

fn request(session_id: &str) -> CreateSandboxRequest {
    CreateSandboxRequest {
        session_id: session_id.to_string(),
        repo_url: "https://github.com/acme/app".to_string(),
        runtime: Runtime::Nodejs,
        vcpus: 2,
    }
}

/// A session's full journey: create, run a command, stop, and refuse further commands
#[tokio::test]
async fn test_session_lifecycle() {
    let h = setup_test_manager().await;
    h.backend
        .push_provision(Ok(ProvisionedSandbox {
            handle: "container-1".to_string(),
            public_url: Some("https://u1.example.dev".to_string()),
        }))
        .await;
    h.backend.push_output("file1\n", "", 0).await;

    let created = h.manager.create_sandbox(request("u1")).await.unwrap();
    assert_eq!(created.status, SandboxStatus::Creating);
    assert_eq!(created.runtime, Runtime::Nodejs);
    assert_eq!(created.vcpus, 2);

    let active = wait_for_status(&h.manager, &created.id, SandboxStatus::Active).await;
    assert_eq!(active.external_handle.as_deref(), Some("container-1"));
    assert_eq!(active.public_url.as_deref(), Some("https://u1.example.dev"));

    let current = h.queries.get_user_sandbox("u1").await.unwrap();
    assert_eq!(current.map(|s| s.id), Some(created.id.clone()));

    let pending = h.executor.execute_command(&created.id, "ls -la").await.unwrap();
    assert_eq!(pending.status, CommandStatus::Pending);

    let finished = wait_for_command(h.store.as_ref(), &pending.id).await;
    assert_eq!(finished.status, CommandStatus::Completed);
    assert_eq!(finished.output.as_deref(), Some("file1\n"));
    assert_eq!(finished.error_output, None);
    assert_eq!(finished.exit_code, Some(0));
    assert!(finished.completed_at.is_some());

    let stopped = h.manager.stop_sandbox(&created.id).await.unwrap();
    assert_eq!(stopped.status, SandboxStatus::Stopped);
    assert_eq!(stopped.public_url, None);
    assert_eq!(h.backend.deprovisioned().await, vec!["container-1".to_string()]);

    let err = h
        .executor
        .execute_command(&created.id, "ls")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SandboxError::InvalidState {
            status: SandboxStatus::Stopped,
            ..
        }
    ));
    assert_eq!(err.to_string(), "Sandbox is not active. Current status: stopped");

    // History outlives the sandbox
    let history = h.queries.get_sandbox_commands(&created.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, pending.id);
    assert_eq!(h.queries.get_user_sandbox("u1").await.unwrap(), None);
}

/// Creating a second sandbox stops the first and leaves exactly one live row
#[tokio::test]
async fn test_new_sandbox_supersedes_previous() {
    let h = setup_test_manager().await;

    let first = h.manager.create_sandbox(request("u1")).await.unwrap();
    wait_for_status(&h.manager, &first.id, SandboxStatus::Active).await;

    let second = h.manager.create_sandbox(request("u1")).await.unwrap();
    wait_for_status(&h.manager, &second.id, SandboxStatus::Active).await;

    let first = h.queries.get_sandbox(&first.id).await.unwrap();
    assert_eq!(first.status, SandboxStatus::Stopped);

    let live: Vec<_> = h
        .queries
        .list_session_sandboxes("u1")
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.status.is_live())
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, second.id);

    let current = h.queries.get_user_sandbox("u1").await.unwrap().unwrap();
    assert_eq!(current.id, second.id);
}

/// Sessions are independent of each other
#[tokio::test]
async fn test_sessions_do_not_interfere() {
    let h = setup_test_manager().await;

    let a = h.manager.create_sandbox(request("alice")).await.unwrap();
    let b = h.manager.create_sandbox(request("bob")).await.unwrap();
    wait_for_status(&h.manager, &a.id, SandboxStatus::Active).await;
    wait_for_status(&h.manager, &b.id, SandboxStatus::Active).await;

    h.manager.stop_sandbox(&a.id).await.unwrap();

    assert_eq!(h.queries.get_user_sandbox("alice").await.unwrap(), None);
    assert_eq!(
        h.queries.get_user_sandbox("bob").await.unwrap().map(|s| s.status),
        Some(SandboxStatus::Active)
    );
}

/// A failed provisioning stays visible as the session's current sandbox
#[tokio::test]
async fn test_failed_provisioning_is_reported() {
    let h = setup_test_manager().await;
    h.backend.fail_next_provision("clone failed").await;

    let created = h.manager.create_sandbox(request("u1")).await.unwrap();
    let failed = wait_for_status(&h.manager, &created.id, SandboxStatus::Error).await;
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("clone failed")));

    let current = h.queries.get_user_sandbox("u1").await.unwrap().unwrap();
    assert_eq!(current.status, SandboxStatus::Error);

    let err = h.executor.execute_command(&created.id, "ls").await.unwrap_err();
    assert!(matches!(
        err,
        SandboxError::InvalidState {
            status: SandboxStatus::Error,
            ..
        }
    ));
}

/// Commands are listed newest first
#[tokio::test]
async fn test_commands_listed_newest_first() {
    let h = setup_test_manager().await;
    let sandbox = h.manager.create_sandbox(request("u1")).await.unwrap();
    wait_for_status(&h.manager, &sandbox.id, SandboxStatus::Active).await;

    let mut ids = Vec::new();
    for command in ["echo one", "echo two", "echo three"] {
        let pending = h.executor.execute_command(&sandbox.id, command).await.unwrap();
        wait_for_command(h.store.as_ref(), &pending.id).await;
        ids.push(pending.id);
    }

    let listed: Vec<String> = h
        .queries
        .get_sandbox_commands(&sandbox.id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

/// Restart recovery finalises in-flight rows, and the reaper purges them later
#[tokio::test]
async fn test_recovery_then_purge() {
    let h = setup_test_manager().await;
    h.backend.hold_runs();

    let sandbox = h.manager.create_sandbox(request("u1")).await.unwrap();
    wait_for_status(&h.manager, &sandbox.id, SandboxStatus::Active).await;
    let pending = h.executor.execute_command(&sandbox.id, "sleep 100").await.unwrap();

    h.backend.hold_provisioning();
    let interrupted = h.manager.create_sandbox(request("u2")).await.unwrap();

    // Simulate the next process starting over the same database
    let stats = reaper::recover_interrupted(h.store.as_ref()).await.unwrap();
    assert_eq!(stats.sandboxes, 1);
    assert_eq!(stats.commands, 1);

    let recovered = h.queries.get_sandbox(&interrupted.id).await.unwrap();
    assert_eq!(recovered.status, SandboxStatus::Error);
    let command = h.queries.get_command(&pending.id).await.unwrap();
    assert_eq!(command.status, CommandStatus::Failed);

    // Zero retention purges every terminal sandbox, leaving the active one
    tokio::time::sleep(Duration::from_millis(5)).await;
    let purged = reaper::purge_once(h.store.as_ref(), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(purged.sandboxes, 1);
    assert!(matches!(
        h.queries.get_sandbox(&interrupted.id).await,
        Err(SandboxError::SandboxNotFound(_))
    ));
    assert_eq!(
        h.queries.get_sandbox(&sandbox.id).await.unwrap().status,
        SandboxStatus::Active
    );

    h.backend.release_provisioning();
    h.backend.release_runs();
}
