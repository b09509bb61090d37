// ABOUTME: Docker backend hosting each sandbox in a local container
// ABOUTME: Uses bollard to pull runtime images, clone the repository and exec shell commands

use super::{
    BackendError, ComputeBackend, ExecResult, ProvisionRequest, ProvisionedSandbox, Result,
};
use crate::types::Runtime;
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Repository checkout location inside every container
pub const WORKSPACE_DIR: &str = "/workspace";

const LABEL_PREFIX: &str = "devbox.sandbox";

/// Image per runtime unless overridden with [`DockerBackend::with_image`]
pub fn default_images() -> HashMap<Runtime, String> {
    HashMap::from([
        (Runtime::Nodejs, "node:20-bookworm".to_string()),
        (Runtime::Python, "python:3.12-bookworm".to_string()),
    ])
}

pub struct DockerBackend {
    client: Docker,
    public_host: String,
    images: HashMap<Runtime, String>,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerBackend {
    /// Connect to the local Docker daemon
    pub fn new(public_host: impl Into<String>) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| BackendError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client(client, public_host))
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker, public_host: impl Into<String>) -> Self {
        Self {
            client,
            public_host: public_host.into(),
            images: default_images(),
            pull_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Override the image used for a runtime
    pub fn with_image(mut self, runtime: Runtime, image: impl Into<String>) -> Self {
        self.images.insert(runtime, image.into());
        self
    }

    fn image_for(images: &HashMap<Runtime, String>, runtime: Runtime) -> Result<&str> {
        images
            .get(&runtime)
            .map(String::as_str)
            .ok_or_else(|| BackendError::ConfigError(format!("No image for runtime {}", runtime)))
    }

    /// Port the application inside the sandbox is expected to listen on
    pub fn app_port(runtime: Runtime) -> u16 {
        match runtime {
            Runtime::Nodejs => 3000,
            Runtime::Python => 8000,
        }
    }

    fn container_name(sandbox_id: &str) -> String {
        format!("devbox-{}", sandbox_id)
    }

    fn container_config(
        images: &HashMap<Runtime, String>,
        request: &ProvisionRequest,
    ) -> Result<Config<String>> {
        let image = Self::image_for(images, request.runtime)?;
        let app_port = format!("{}/tcp", Self::app_port(request.runtime));

        let labels = HashMap::from([
            (format!("{}.managed", LABEL_PREFIX), "true".to_string()),
            (format!("{}.id", LABEL_PREFIX), request.sandbox_id.clone()),
            (
                format!("{}.runtime", LABEL_PREFIX),
                request.runtime.to_string(),
            ),
        ]);

        let host_config = bollard::models::HostConfig {
            // Ephemeral host port for the exposed app port
            publish_all_ports: Some(true),
            nano_cpus: Some(i64::from(request.vcpus) * 1_000_000_000),
            ..Default::default()
        };

        Ok(Config {
            image: Some(image.to_string()),
            // Keep the container alive between exec calls
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            labels: Some(labels),
            exposed_ports: Some(HashMap::from([(app_port, HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(BackendError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut last_status = String::new();
            while let Some(progress) = stream.next().await {
                let progress = progress.map_err(|e| {
                    BackendError::ImageError(format!("Failed to pull image {}: {}", image, e))
                })?;
                if let Some(error) = progress.error {
                    return Err(BackendError::ImageError(format!(
                        "Failed to pull image {}: {}",
                        image, error
                    )));
                }
                if let Some(status) = progress.status {
                    if status != last_status {
                        debug!("Pull status: {}", status);
                        last_status = status;
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if !self.image_exists(image).await? {
            self.pull_image(image).await?;
        }
        Ok(())
    }

    /// Run `cmd` in the container and collect its output and exit code
    async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        working_dir: Option<&str>,
    ) -> Result<ExecResult> {
        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            working_dir: working_dir.map(str::to_string),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| BackendError::ExecError(e.to_string()))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| BackendError::ExecError(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            stdout.extend_from_slice(&message)
                        }
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::StdIn { .. }) => {}
                        Err(e) => return Err(BackendError::ExecError(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(BackendError::ExecError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| BackendError::ExecError(e.to_string()))?;

        let exit_code = exec_inspect.exit_code.ok_or_else(|| {
            BackendError::ExecError("Exec finished without an exit code".to_string())
        })?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: i32::try_from(exit_code).unwrap_or(i32::MAX),
        })
    }

    /// Host port Docker bound to the container's app port
    async fn published_port(&self, container_id: &str, runtime: Runtime) -> Result<Option<u16>> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| BackendError::ProvisionError(e.to_string()))?;

        let key = format!("{}/tcp", Self::app_port(runtime));
        let port = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(&key).cloned().flatten())
            .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
            .and_then(|port| port.parse().ok());

        Ok(port)
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(e) => Err(BackendError::ProvisionError(e.to_string())),
        }
    }

    /// Clone the repository and resolve the public URL of a started container
    async fn prepare(&self, container_id: &str, request: &ProvisionRequest) -> Result<Option<String>> {
        let clone = self
            .exec(
                container_id,
                vec![
                    "git".to_string(),
                    "clone".to_string(),
                    "--depth".to_string(),
                    "1".to_string(),
                    request.repo_url.clone(),
                    WORKSPACE_DIR.to_string(),
                ],
                None,
            )
            .await?;

        if clone.exit_code != 0 {
            return Err(BackendError::ProvisionError(format!(
                "git clone of {} failed with exit code {}: {}",
                request.repo_url,
                clone.exit_code,
                clone.stderr.trim()
            )));
        }

        let port = self.published_port(container_id, request.runtime).await?;
        Ok(port.map(|port| format!("http://{}:{}", self.public_host, port)))
    }
}

#[async_trait]
impl ComputeBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedSandbox> {
        let config = Self::container_config(&self.images, request)?;
        if let Some(image) = &config.image {
            self.ensure_image(image).await?;
        }

        let options = CreateContainerOptions {
            name: Self::container_name(&request.sandbox_id),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| BackendError::ProvisionError(e.to_string()))?;

        info!(sandbox_id = %request.sandbox_id, container_id = %container.id, "Created container");

        let started = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| BackendError::ProvisionError(e.to_string()));

        let prepared = match started {
            Ok(()) => self.prepare(&container.id, request).await,
            Err(e) => Err(e),
        };

        match prepared {
            Ok(public_url) => Ok(ProvisionedSandbox {
                handle: container.id,
                public_url,
            }),
            Err(e) => {
                if let Err(cleanup) = self.remove(&container.id).await {
                    warn!(
                        container_id = %container.id,
                        error = %cleanup,
                        "Failed to remove container after provisioning failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn deprovision(&self, handle: &str) -> Result<()> {
        info!(container_id = %handle, "Removing container");
        self.remove(handle).await
    }

    async fn run(&self, handle: &str, command: &str) -> Result<ExecResult> {
        debug!(container_id = %handle, "Executing command");
        self.exec(
            handle,
            vec!["sh".to_string(), "-lc".to_string(), command.to_string()],
            Some(WORKSPACE_DIR),
        )
        .await
    }
}
