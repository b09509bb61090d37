// ABOUTME: Persistence contract for sandboxes and their command history
// ABOUTME: Every status write is a compare-and-set against the statuses a transition may leave

use crate::types::{CommandTransition, Sandbox, SandboxCommand, SandboxTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteSandboxStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A live sandbox already exists for the session
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Counts removed by one purge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub sandboxes: u64,
    pub commands: u64,
}

/// Rows finalised after an unclean shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub sandboxes: u64,
    pub commands: u64,
}

pub const INTERRUPTED_PROVISIONING: &str = "provisioning interrupted by server restart";
pub const INTERRUPTED_COMMAND: &str = "command interrupted by server restart";

/// Exit code recorded for commands that never produced one
pub const DISPATCH_FAILURE_EXIT_CODE: i32 = -1;

#[async_trait]
pub trait SandboxStore: Send + Sync {
    /// Insert a new sandbox. Fails with `Conflict` when the session already
    /// has a `creating` or `active` sandbox.
    async fn insert_sandbox(&self, sandbox: &Sandbox) -> Result<()>;

    async fn get_sandbox(&self, id: &str) -> Result<Option<Sandbox>>;

    /// Most recently created sandbox of the session, whatever its status
    async fn latest_sandbox_for_session(&self, session_id: &str) -> Result<Option<Sandbox>>;

    /// All sandboxes of the session, newest first
    async fn list_session_sandboxes(&self, session_id: &str) -> Result<Vec<Sandbox>>;

    /// Stop every live sandbox of the session, returning the stopped rows
    async fn stop_live_sandboxes(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Sandbox>>;

    /// Apply the transition if the sandbox is in one of its allowed statuses.
    /// Returns `None` when the sandbox is missing or the status forbids it.
    async fn transition_sandbox(
        &self,
        id: &str,
        transition: SandboxTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<Sandbox>>;

    /// Insert a pending command only while its sandbox is `active`.
    /// Returns false, without writing, otherwise.
    async fn insert_command(&self, command: &SandboxCommand) -> Result<bool>;

    async fn get_command(&self, id: &str) -> Result<Option<SandboxCommand>>;

    /// Commands of the sandbox, newest first
    async fn list_commands(&self, sandbox_id: &str) -> Result<Vec<SandboxCommand>>;

    async fn transition_command(
        &self,
        id: &str,
        transition: CommandTransition,
    ) -> Result<Option<SandboxCommand>>;

    /// Delete `stopped`/`error` sandboxes last updated before `older_than`,
    /// together with their commands, in one batch
    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<PurgeStats>;

    /// Finalise rows left in flight by a previous process
    async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<RecoveryStats>;
}
