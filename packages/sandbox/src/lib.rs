// ABOUTME: Sandbox session management: one sandbox per session, commands and their history
// ABOUTME: Re-exports the lifecycle manager, executor, queries, stores and compute backends

pub mod error;
pub mod executor;
pub mod manager;
pub mod providers;
pub mod query;
pub mod reaper;
pub mod settings;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use error::{Result, SandboxError};
pub use executor::{CommandExecutor, TIMEOUT_EXIT_CODE};
pub use manager::{CreateSandboxRequest, SandboxManager};
pub use providers::{
    BackendError, ComputeBackend, DockerBackend, ExecResult, HttpBackend, ProvisionRequest,
    ProvisionedSandbox,
};
pub use query::SandboxQueries;
pub use settings::SandboxSettings;
pub use store::{
    MemoryStore, PurgeStats, RecoveryStats, SandboxStore, SqliteSandboxStore, StorageError,
    DISPATCH_FAILURE_EXIT_CODE,
};
pub use types::{
    now_micros, CommandOutcome, CommandStatus, CommandTransition, Runtime, Sandbox,
    SandboxCommand, SandboxStatus, SandboxTransition,
};
