// ABOUTME: Read-only accessors for a session's current sandbox and command history
// ABOUTME: Never writes; all ordering is newest first

use crate::error::{Result, SandboxError};
use crate::store::SandboxStore;
use crate::types::{Sandbox, SandboxCommand, SandboxStatus};
use crate::validation::validate_session_id;
use std::sync::Arc;

pub struct SandboxQueries {
    store: Arc<dyn SandboxStore>,
}

impl SandboxQueries {
    pub fn new(store: Arc<dyn SandboxStore>) -> Self {
        Self { store }
    }

    /// The session's most recent sandbox, unless that sandbox is stopped.
    ///
    /// Only the newest row is considered: an older live row behind a stopped
    /// newer one is not returned. `error` sandboxes are returned.
    pub async fn get_user_sandbox(&self, session_id: &str) -> Result<Option<Sandbox>> {
        validate_session_id(session_id)?;

        let latest = self.store.latest_sandbox_for_session(session_id).await?;
        Ok(latest.filter(|sandbox| sandbox.status != SandboxStatus::Stopped))
    }

    /// Commands of the sandbox, newest first. Unknown ids yield an empty list.
    pub async fn get_sandbox_commands(&self, sandbox_id: &str) -> Result<Vec<SandboxCommand>> {
        Ok(self.store.list_commands(sandbox_id).await?)
    }

    /// Every sandbox the session ever had, newest first
    pub async fn list_session_sandboxes(&self, session_id: &str) -> Result<Vec<Sandbox>> {
        validate_session_id(session_id)?;
        Ok(self.store.list_session_sandboxes(session_id).await?)
    }

    pub async fn get_sandbox(&self, sandbox_id: &str) -> Result<Sandbox> {
        self.store
            .get_sandbox(sandbox_id)
            .await?
            .ok_or_else(|| SandboxError::SandboxNotFound(sandbox_id.to_string()))
    }

    pub async fn get_command(&self, command_id: &str) -> Result<SandboxCommand> {
        self.store
            .get_command(command_id)
            .await?
            .ok_or_else(|| SandboxError::CommandNotFound(command_id.to_string()))
    }
}
