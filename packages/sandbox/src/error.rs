// ABOUTME: Error taxonomy surfaced by sandbox lifecycle, execution and query operations
// ABOUTME: Storage and backend failures are wrapped; everything else is detected before writes

use crate::providers::BackendError;
use crate::store::StorageError;
use crate::types::SandboxStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox not found: {0}")]
    SandboxNotFound(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Sandbox is not active. Current status: {status}")]
    InvalidState {
        sandbox_id: String,
        status: SandboxStatus,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
