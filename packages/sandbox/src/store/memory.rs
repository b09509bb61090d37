// ABOUTME: In-memory sandbox store for tests and embedded use
// ABOUTME: Checks and writes happen under one write lock, mirroring the SQLite constraints

use super::{
    PurgeStats, RecoveryStats, Result, SandboxStore, StorageError, DISPATCH_FAILURE_EXIT_CODE,
    INTERRUPTED_COMMAND, INTERRUPTED_PROVISIONING,
};
use crate::types::{
    CommandOutcome, CommandStatus, CommandTransition, Sandbox, SandboxCommand, SandboxStatus,
    SandboxTransition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Rows are kept in insertion order, which breaks `created_at` ties
#[derive(Default)]
struct MemoryState {
    sandboxes: Vec<Sandbox>,
    commands: Vec<SandboxCommand>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first by `created_at`, later insertions first on ties
fn newest_first<T: Clone>(
    mut rows: Vec<(usize, &T)>,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    rows.sort_by(|(ia, a), (ib, b)| created_at(*b).cmp(&created_at(*a)).then(ib.cmp(ia)));
    rows.into_iter().map(|(_, row)| row.clone()).collect()
}

#[async_trait]
impl SandboxStore for MemoryStore {
    async fn insert_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        let mut state = self.state.write().await;

        if sandbox.status.is_live()
            && state
                .sandboxes
                .iter()
                .any(|s| s.session_id == sandbox.session_id && s.status.is_live())
        {
            return Err(StorageError::Conflict(format!(
                "session {} already has a live sandbox",
                sandbox.session_id
            )));
        }

        state.sandboxes.push(sandbox.clone());
        Ok(())
    }

    async fn get_sandbox(&self, id: &str) -> Result<Option<Sandbox>> {
        let state = self.state.read().await;
        Ok(state.sandboxes.iter().find(|s| s.id == id).cloned())
    }

    async fn latest_sandbox_for_session(&self, session_id: &str) -> Result<Option<Sandbox>> {
        Ok(self
            .list_session_sandboxes(session_id)
            .await?
            .into_iter()
            .next())
    }

    async fn list_session_sandboxes(&self, session_id: &str) -> Result<Vec<Sandbox>> {
        let state = self.state.read().await;
        let rows: Vec<(usize, &Sandbox)> = state
            .sandboxes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.session_id == session_id)
            .collect();
        Ok(newest_first(rows, |s| s.created_at))
    }

    async fn stop_live_sandboxes(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Sandbox>> {
        let mut state = self.state.write().await;
        let mut stopped = Vec::new();

        for sandbox in state
            .sandboxes
            .iter_mut()
            .filter(|s| s.session_id == session_id && s.status.is_live())
        {
            if SandboxTransition::Stop.apply(sandbox, now) {
                stopped.push(sandbox.clone());
            }
        }

        Ok(stopped)
    }

    async fn transition_sandbox(
        &self,
        id: &str,
        transition: SandboxTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<Sandbox>> {
        let mut state = self.state.write().await;
        let Some(sandbox) = state.sandboxes.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };

        if transition.apply(sandbox, now) {
            Ok(Some(sandbox.clone()))
        } else {
            Ok(None)
        }
    }

    async fn insert_command(&self, command: &SandboxCommand) -> Result<bool> {
        let mut state = self.state.write().await;

        let active = state
            .sandboxes
            .iter()
            .any(|s| s.id == command.sandbox_id && s.status == SandboxStatus::Active);
        if !active {
            return Ok(false);
        }

        state.commands.push(command.clone());
        Ok(true)
    }

    async fn get_command(&self, id: &str) -> Result<Option<SandboxCommand>> {
        let state = self.state.read().await;
        Ok(state.commands.iter().find(|c| c.id == id).cloned())
    }

    async fn list_commands(&self, sandbox_id: &str) -> Result<Vec<SandboxCommand>> {
        let state = self.state.read().await;
        let rows: Vec<(usize, &SandboxCommand)> = state
            .commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.sandbox_id == sandbox_id)
            .collect();
        Ok(newest_first(rows, |c| c.created_at))
    }

    async fn transition_command(
        &self,
        id: &str,
        transition: CommandTransition,
    ) -> Result<Option<SandboxCommand>> {
        let mut state = self.state.write().await;
        let Some(command) = state.commands.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };

        if transition.apply(command) {
            Ok(Some(command.clone()))
        } else {
            Ok(None)
        }
    }

    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<PurgeStats> {
        let mut state = self.state.write().await;

        let expired: Vec<String> = state
            .sandboxes
            .iter()
            .filter(|s| s.status.is_terminal() && s.updated_at < older_than)
            .map(|s| s.id.clone())
            .collect();

        let commands_before = state.commands.len();
        state.commands.retain(|c| !expired.contains(&c.sandbox_id));
        let commands = (commands_before - state.commands.len()) as u64;

        state.sandboxes.retain(|s| !expired.contains(&s.id));

        Ok(PurgeStats {
            sandboxes: expired.len() as u64,
            commands,
        })
    }

    async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<RecoveryStats> {
        let mut state = self.state.write().await;
        let mut stats = RecoveryStats::default();

        let fail = SandboxTransition::Fail {
            message: INTERRUPTED_PROVISIONING.to_string(),
        };
        for sandbox in state
            .sandboxes
            .iter_mut()
            .filter(|s| s.status == SandboxStatus::Creating)
        {
            if fail.apply(sandbox, now) {
                stats.sandboxes += 1;
            }
        }

        let finish = CommandTransition::Finish(CommandOutcome {
            output: None,
            error_output: Some(INTERRUPTED_COMMAND.to_string()),
            exit_code: DISPATCH_FAILURE_EXIT_CODE,
            completed_at: now,
        });
        for command in state
            .commands
            .iter_mut()
            .filter(|c| matches!(c.status, CommandStatus::Pending | CommandStatus::Running))
        {
            if finish.apply(command) {
                stats.commands += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance::store_conformance_tests;

    store_conformance_tests!(MemoryStore::new());
}
