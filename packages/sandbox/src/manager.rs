// ABOUTME: Sandbox lifecycle manager orchestrating the store and the compute backend
// ABOUTME: Enforces one live sandbox per session and records provisioning outcomes

use crate::error::{Result, SandboxError};
use crate::providers::{ComputeBackend, ProvisionRequest};
use crate::settings::SandboxSettings;
use crate::store::{SandboxStore, StorageError};
use crate::types::{now_micros, Runtime, Sandbox, SandboxStatus, SandboxTransition};
use crate::validation::{validate_repo_url, validate_session_id, validate_vcpus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Request to create a new sandbox
#[derive(Debug, Clone)]
pub struct CreateSandboxRequest {
    pub session_id: String,
    pub repo_url: String,
    pub runtime: Runtime,
    pub vcpus: u32,
}

impl CreateSandboxRequest {
    pub fn validate(&self, max_vcpus: u32) -> Result<()> {
        validate_session_id(&self.session_id)?;
        validate_repo_url(&self.repo_url)?;
        validate_vcpus(self.vcpus, max_vcpus)?;
        Ok(())
    }
}

/// Sandbox lifecycle manager
pub struct SandboxManager {
    store: Arc<dyn SandboxStore>,
    backend: Arc<dyn ComputeBackend>,
    settings: SandboxSettings,
}

impl SandboxManager {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        backend: Arc<dyn ComputeBackend>,
        settings: SandboxSettings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SandboxStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Create a sandbox for the session, stopping any live one it already has.
    ///
    /// Returns the `creating` row; provisioning continues in the background and
    /// moves it to `active` or `error`.
    pub async fn create_sandbox(&self, request: CreateSandboxRequest) -> Result<Sandbox> {
        request.validate(self.settings.max_vcpus)?;

        let attempts = self.settings.create_attempts.max(1);
        for attempt in 1..=attempts {
            self.supersede_live_sandboxes(&request.session_id).await;

            let sandbox = Sandbox::new_creating(
                request.session_id.clone(),
                request.repo_url.clone(),
                request.runtime,
                request.vcpus,
            );

            match self.store.insert_sandbox(&sandbox).await {
                Ok(()) => {
                    info!(
                        sandbox_id = %sandbox.id,
                        session_id = %sandbox.session_id,
                        runtime = %sandbox.runtime,
                        vcpus = sandbox.vcpus,
                        "Sandbox created, provisioning"
                    );
                    self.spawn_provisioning(&sandbox);
                    return Ok(sandbox);
                }
                Err(StorageError::Conflict(reason)) => {
                    warn!(
                        session_id = %request.session_id,
                        attempt,
                        "Concurrent sandbox creation detected: {}",
                        reason
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SandboxError::Conflict(format!(
            "could not create a sandbox for session {} after {} attempts",
            request.session_id, attempts
        )))
    }

    /// Stop a sandbox and release its backend resources.
    ///
    /// Stopping an already stopped sandbox returns it unchanged.
    pub async fn stop_sandbox(&self, sandbox_id: &str) -> Result<Sandbox> {
        let current = self.get_sandbox(sandbox_id).await?;
        if current.status == SandboxStatus::Stopped {
            debug!(sandbox_id = %sandbox_id, "Sandbox already stopped");
            return Ok(current);
        }

        let stopped = match self
            .store
            .transition_sandbox(sandbox_id, SandboxTransition::Stop, now_micros())
            .await?
        {
            Some(stopped) => stopped,
            // Lost a race with another stop
            None => {
                let latest = self.get_sandbox(sandbox_id).await?;
                if latest.status == SandboxStatus::Stopped {
                    return Ok(latest);
                }
                return Err(SandboxError::InvalidState {
                    sandbox_id: sandbox_id.to_string(),
                    status: latest.status,
                });
            }
        };

        info!(sandbox_id = %sandbox_id, previous_status = %current.status, "Sandbox stopped");

        if let Some(handle) = &stopped.external_handle {
            teardown(
                self.backend.as_ref(),
                sandbox_id,
                handle,
                self.settings.teardown_timeout,
            )
            .await;
        }

        Ok(stopped)
    }

    pub async fn get_sandbox(&self, sandbox_id: &str) -> Result<Sandbox> {
        self.store
            .get_sandbox(sandbox_id)
            .await?
            .ok_or_else(|| SandboxError::SandboxNotFound(sandbox_id.to_string()))
    }

    /// Whether the compute backend is reachable
    pub async fn check_backend(&self) -> Result<bool> {
        Ok(self.backend.is_available().await?)
    }

    /// Stop the session's live sandboxes. Failures are logged and creation
    /// proceeds; the insert constraint still guards the invariant.
    async fn supersede_live_sandboxes(&self, session_id: &str) {
        let stopped = match self
            .store
            .stop_live_sandboxes(session_id, now_micros())
            .await
        {
            Ok(stopped) => stopped,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to stop existing sandboxes");
                return;
            }
        };

        for sandbox in stopped {
            info!(
                sandbox_id = %sandbox.id,
                session_id = %session_id,
                "Superseded existing sandbox"
            );

            if let Some(handle) = sandbox.external_handle {
                let backend = Arc::clone(&self.backend);
                let timeout = self.settings.teardown_timeout;
                let sandbox_id = sandbox.id;
                tokio::spawn(async move {
                    teardown(backend.as_ref(), &sandbox_id, &handle, timeout).await;
                });
            }
        }
    }

    fn spawn_provisioning(&self, sandbox: &Sandbox) {
        let store = Arc::clone(&self.store);
        let backend = Arc::clone(&self.backend);
        let request = ProvisionRequest::from(sandbox);
        let provision_timeout = self.settings.provision_timeout;
        let teardown_timeout = self.settings.teardown_timeout;

        tokio::spawn(async move {
            provision(
                store.as_ref(),
                backend.as_ref(),
                request,
                provision_timeout,
                teardown_timeout,
            )
            .await;
        });
    }
}

/// Run provisioning to completion and record the outcome on the sandbox
async fn provision(
    store: &dyn SandboxStore,
    backend: &dyn ComputeBackend,
    request: ProvisionRequest,
    provision_timeout: Duration,
    teardown_timeout: Duration,
) {
    let sandbox_id = request.sandbox_id.as_str();

    let outcome = match tokio::time::timeout(provision_timeout, backend.provision(&request)).await
    {
        Ok(Ok(provisioned)) => Ok(provisioned),
        Ok(Err(e)) => Err(format!("Provisioning failed: {}", e)),
        Err(_) => Err(format!(
            "Provisioning timed out after {}s",
            provision_timeout.as_secs()
        )),
    };

    let provisioned = match outcome {
        Ok(provisioned) => provisioned,
        Err(message) => {
            warn!(sandbox_id = %sandbox_id, backend = backend.name(), "{}", message);
            record_failure(store, sandbox_id, message).await;
            return;
        }
    };

    let handle = provisioned.handle.clone();
    let activate = SandboxTransition::Activate {
        handle: provisioned.handle,
        public_url: provisioned.public_url,
    };

    match store
        .transition_sandbox(sandbox_id, activate, now_micros())
        .await
    {
        Ok(Some(active)) => {
            info!(
                sandbox_id = %sandbox_id,
                public_url = active.public_url.as_deref().unwrap_or(""),
                "Sandbox active"
            );
        }
        Ok(None) => {
            // Stopped or superseded while provisioning was in flight
            info!(
                sandbox_id = %sandbox_id,
                "Sandbox left creating during provisioning, releasing backend resources"
            );
            teardown(backend, sandbox_id, &handle, teardown_timeout).await;
        }
        Err(e) => {
            error!(sandbox_id = %sandbox_id, error = %e, "Failed to record provisioning success");
            record_failure(
                store,
                sandbox_id,
                format!("Failed to record provisioning result: {}", e),
            )
            .await;
            teardown(backend, sandbox_id, &handle, teardown_timeout).await;
        }
    }
}

async fn record_failure(store: &dyn SandboxStore, sandbox_id: &str, message: String) {
    match store
        .transition_sandbox(sandbox_id, SandboxTransition::Fail { message }, now_micros())
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => debug!(sandbox_id = %sandbox_id, "Sandbox left creating before failure was recorded"),
        Err(e) => error!(sandbox_id = %sandbox_id, error = %e, "Failed to record provisioning failure"),
    }
}

/// Best-effort release of a backend handle, bounded by `timeout`
pub(crate) async fn teardown(
    backend: &dyn ComputeBackend,
    sandbox_id: &str,
    handle: &str,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, backend.deprovision(handle)).await {
        Ok(Ok(())) => debug!(sandbox_id = %sandbox_id, handle = %handle, "Backend resources released"),
        Ok(Err(e)) => warn!(
            sandbox_id = %sandbox_id,
            handle = %handle,
            error = %e,
            "Failed to release backend resources"
        ),
        Err(_) => warn!(
            sandbox_id = %sandbox_id,
            handle = %handle,
            "Timed out releasing backend resources after {}s",
            timeout.as_secs()
        ),
    }
}
