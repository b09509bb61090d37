// ABOUTME: Scripted in-process backend for tests of the lifecycle manager and API
// ABOUTME: Queued outcomes, gates that hold calls in flight, and a record of every call

use super::{
    BackendError, ComputeBackend, ExecResult, ProvisionRequest, ProvisionedSandbox, Result,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, Mutex};

/// Blocks callers while closed
struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: watch::Sender::new(true),
        }
    }

    fn set(&self, open: bool) {
        self.open.send_replace(open);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as the gate, so this only fails on drop
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Backend whose behaviour is scripted per test.
///
/// Without scripted outcomes, provisioning succeeds with handle
/// `mock-<sandbox_id>` and every command exits 0 with empty output.
pub struct MockBackend {
    available: AtomicBool,
    provision_outcomes: Mutex<VecDeque<Result<ProvisionedSandbox>>>,
    run_outcomes: Mutex<VecDeque<Result<ExecResult>>>,
    provision_gate: Gate,
    run_gate: Gate,
    provisioned: Mutex<Vec<ProvisionRequest>>,
    deprovisioned: Mutex<Vec<String>>,
    commands: Mutex<Vec<(String, String)>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            provision_outcomes: Mutex::new(VecDeque::new()),
            run_outcomes: Mutex::new(VecDeque::new()),
            provision_gate: Gate::new(),
            run_gate: Gate::new(),
            provisioned: Mutex::new(Vec::new()),
            deprovisioned: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue the outcome of the next `provision` call
    pub async fn push_provision(&self, outcome: Result<ProvisionedSandbox>) {
        self.provision_outcomes.lock().await.push_back(outcome);
    }

    /// Queue a provisioning failure
    pub async fn fail_next_provision(&self, message: &str) {
        self.push_provision(Err(BackendError::ProvisionError(message.to_string())))
            .await;
    }

    /// Queue the outcome of the next `run` call
    pub async fn push_run(&self, outcome: Result<ExecResult>) {
        self.run_outcomes.lock().await.push_back(outcome);
    }

    pub async fn push_output(&self, stdout: &str, stderr: &str, exit_code: i32) {
        self.push_run(Ok(ExecResult {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }))
        .await;
    }

    /// Hold `provision` calls until `release_provisioning`
    pub fn hold_provisioning(&self) {
        self.provision_gate.set(false);
    }

    pub fn release_provisioning(&self) {
        self.provision_gate.set(true);
    }

    /// Hold `run` calls until `release_runs`
    pub fn hold_runs(&self) {
        self.run_gate.set(false);
    }

    pub fn release_runs(&self) {
        self.run_gate.set(true);
    }

    pub async fn provisioned(&self) -> Vec<ProvisionRequest> {
        self.provisioned.lock().await.clone()
    }

    pub async fn deprovisioned(&self) -> Vec<String> {
        self.deprovisioned.lock().await.clone()
    }

    /// `(handle, command)` pairs in call order
    pub async fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().await.clone()
    }
}

#[async_trait]
impl ComputeBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedSandbox> {
        self.provisioned.lock().await.push(request.clone());
        self.provision_gate.pass().await;

        match self.provision_outcomes.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(ProvisionedSandbox {
                handle: format!("mock-{}", request.sandbox_id),
                public_url: Some(format!("https://{}.mock.devbox.local", request.sandbox_id)),
            }),
        }
    }

    async fn deprovision(&self, handle: &str) -> Result<()> {
        self.deprovisioned.lock().await.push(handle.to_string());
        Ok(())
    }

    async fn run(&self, handle: &str, command: &str) -> Result<ExecResult> {
        self.commands
            .lock()
            .await
            .push((handle.to_string(), command.to_string()));
        self.run_gate.pass().await;

        match self.run_outcomes.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(ExecResult::default()),
        }
    }
}
