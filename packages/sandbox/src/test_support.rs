// ABOUTME: Polling helpers for tests that observe background provisioning and dispatch
// ABOUTME: Available to this crate's tests and, behind the test-utils feature, to other crates

use crate::manager::SandboxManager;
use crate::providers::MockBackend;
use crate::store::SandboxStore;
use crate::types::{Sandbox, SandboxCommand, SandboxStatus};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_ATTEMPTS: usize = 500;

/// Wait until the sandbox reaches `status`, panicking after a few seconds
pub async fn wait_for_status(
    manager: &SandboxManager,
    sandbox_id: &str,
    status: SandboxStatus,
) -> Sandbox {
    let mut last = None;
    for _ in 0..POLL_ATTEMPTS {
        let sandbox = manager
            .get_sandbox(sandbox_id)
            .await
            .unwrap_or_else(|e| panic!("failed to load sandbox {sandbox_id}: {e}"));
        if sandbox.status == status {
            return sandbox;
        }
        last = Some(sandbox.status);
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("sandbox {sandbox_id} never reached {status}, last seen {last:?}");
}

/// Wait until the command is `completed` or `failed`
pub async fn wait_for_command(store: &dyn SandboxStore, command_id: &str) -> SandboxCommand {
    for _ in 0..POLL_ATTEMPTS {
        let command = store
            .get_command(command_id)
            .await
            .unwrap_or_else(|e| panic!("failed to load command {command_id}: {e}"))
            .unwrap_or_else(|| panic!("command {command_id} does not exist"));
        if command.status.is_terminal() {
            return command;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("command {command_id} never finished");
}

/// Wait until the mock backend has been asked to release `handle`
pub async fn wait_for_deprovision(backend: &MockBackend, handle: &str) {
    for _ in 0..POLL_ATTEMPTS {
        if backend.deprovisioned().await.iter().any(|h| h == handle) {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("handle {handle} was never deprovisioned");
}
