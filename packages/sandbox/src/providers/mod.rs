// ABOUTME: Compute backend trait and implementations that host sandboxes
// ABOUTME: Defines the provision / run / deprovision capability the lifecycle manager drives

use crate::types::{Runtime, Sandbox};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod docker;
pub mod http;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use docker::DockerBackend;
pub use http::HttpBackend;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Provisioning error: {0}")]
    ProvisionError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Execution error: {0}")]
    ExecError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Backend not available: {0}")]
    NotAvailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// What the backend needs to bring a sandbox up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub sandbox_id: String,
    pub repo_url: String,
    pub runtime: Runtime,
    pub vcpus: u32,
}

impl From<&Sandbox> for ProvisionRequest {
    fn from(sandbox: &Sandbox) -> Self {
        Self {
            sandbox_id: sandbox.id.clone(),
            repo_url: sandbox.repo_url.clone(),
            runtime: sandbox.runtime,
            vcpus: sandbox.vcpus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedSandbox {
    /// Backend-specific identifier used for later run/deprovision calls
    pub handle: String,
    pub public_url: Option<String>,
}

/// Result of running a command to completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: i32,
}

/// Capability interface to whatever actually hosts sandboxes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Short name used in logs and the health report
    fn name(&self) -> &'static str;

    /// Check if the backend is reachable and configured correctly
    async fn is_available(&self) -> Result<bool>;

    /// Create the sandbox, check out the repository and expose it
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedSandbox>;

    /// Tear the sandbox down. Unknown handles are not an error.
    async fn deprovision(&self, handle: &str) -> Result<()>;

    /// Run a shell command inside the sandbox and wait for it to exit
    async fn run(&self, handle: &str, command: &str) -> Result<ExecResult>;
}
