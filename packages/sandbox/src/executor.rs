// ABOUTME: Command executor recording and dispatching shell commands in active sandboxes
// ABOUTME: Returns the pending command at once and finishes it from a background task

use crate::error::{Result, SandboxError};
use crate::manager::SandboxManager;
use crate::providers::ComputeBackend;
use crate::store::{SandboxStore, DISPATCH_FAILURE_EXIT_CODE};
use crate::types::{
    now_micros, CommandOutcome, CommandTransition, SandboxCommand, SandboxStatus,
};
use crate::validation::validate_command;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Exit code recorded when a command exceeds the command timeout, as `timeout(1)` does
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Command executor for sandboxes
pub struct CommandExecutor {
    manager: Arc<SandboxManager>,
}

impl CommandExecutor {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self { manager }
    }

    /// Record a command against an active sandbox and dispatch it.
    ///
    /// The returned command is `pending`; its outcome is observed through the
    /// query service once the backend call finishes.
    pub async fn execute_command(&self, sandbox_id: &str, command: &str) -> Result<SandboxCommand> {
        validate_command(command, self.manager.settings().max_command_length)?;

        let store = self.manager.store();
        let sandbox = self.manager.get_sandbox(sandbox_id).await?;
        ensure_active(sandbox_id, sandbox.status)?;

        let pending = SandboxCommand::new_pending(sandbox_id, command);
        if !store.insert_command(&pending).await? {
            // The sandbox changed between the check and the insert
            let latest = self.manager.get_sandbox(sandbox_id).await?;
            return Err(SandboxError::InvalidState {
                sandbox_id: sandbox_id.to_string(),
                status: latest.status,
            });
        }

        info!(
            sandbox_id = %sandbox_id,
            command_id = %pending.id,
            "Command queued"
        );

        let store = Arc::clone(store);
        let backend = Arc::clone(self.manager.backend());
        let timeout = self.manager.settings().command_timeout;
        let handle = sandbox.external_handle;
        let queued = pending.clone();

        tokio::spawn(async move {
            dispatch(store.as_ref(), backend.as_ref(), handle, queued, timeout).await;
        });

        Ok(pending)
    }
}

fn ensure_active(sandbox_id: &str, status: SandboxStatus) -> Result<()> {
    match status {
        SandboxStatus::Active => Ok(()),
        SandboxStatus::Creating | SandboxStatus::Stopped | SandboxStatus::Error => {
            Err(SandboxError::InvalidState {
                sandbox_id: sandbox_id.to_string(),
                status,
            })
        }
    }
}

/// Drive one command from `pending` to a terminal status
async fn dispatch(
    store: &dyn SandboxStore,
    backend: &dyn ComputeBackend,
    handle: Option<String>,
    command: SandboxCommand,
    timeout: Duration,
) {
    match store
        .transition_command(&command.id, CommandTransition::Start)
        .await
    {
        Ok(Some(_)) => debug!(command_id = %command.id, "Command running"),
        Ok(None) => {
            warn!(command_id = %command.id, "Command was no longer pending, skipping dispatch");
            return;
        }
        // Finishing is still allowed from pending, so carry on
        Err(e) => error!(command_id = %command.id, error = %e, "Failed to mark command running"),
    }

    let outcome = match handle {
        None => dispatch_failure("Sandbox has no backend handle".to_string()),
        Some(handle) => {
            match tokio::time::timeout(timeout, backend.run(&handle, &command.command)).await {
                Ok(Ok(result)) => CommandOutcome {
                    output: non_empty(result.stdout),
                    error_output: non_empty(result.stderr),
                    exit_code: result.exit_code,
                    completed_at: now_micros(),
                },
                Ok(Err(e)) => dispatch_failure(e.to_string()),
                Err(_) => CommandOutcome {
                    output: None,
                    error_output: Some(format!(
                        "Command timed out after {}s",
                        timeout.as_secs()
                    )),
                    exit_code: TIMEOUT_EXIT_CODE,
                    completed_at: now_micros(),
                },
            }
        }
    };

    let exit_code = outcome.exit_code;
    match store
        .transition_command(&command.id, CommandTransition::Finish(outcome))
        .await
    {
        Ok(Some(finished)) => info!(
            sandbox_id = %command.sandbox_id,
            command_id = %command.id,
            status = %finished.status,
            exit_code,
            "Command finished"
        ),
        Ok(None) => warn!(command_id = %command.id, "Command already finished elsewhere"),
        Err(e) => error!(command_id = %command.id, error = %e, "Failed to record command result"),
    }
}

fn dispatch_failure(reason: String) -> CommandOutcome {
    CommandOutcome {
        output: None,
        error_output: Some(reason),
        exit_code: DISPATCH_FAILURE_EXIT_CODE,
        completed_at: now_micros(),
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
