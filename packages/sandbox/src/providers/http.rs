// ABOUTME: HTTP backend delegating sandboxes to a remote provisioning API
// ABOUTME: Thin reqwest client for the /sandboxes, /commands and /health endpoints

use super::{
    BackendError, ComputeBackend, ExecResult, ProvisionRequest, ProvisionedSandbox, Result,
};
use crate::types::Runtime;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ProvisionBody<'a> {
    repo_url: &'a str,
    runtime: Runtime,
    vcpus: u32,
}

#[derive(Deserialize)]
struct ProvisionResponse {
    id: String,
    #[serde(default)]
    public_url: Option<String>,
}

#[derive(Serialize)]
struct RunBody<'a> {
    command: &'a str,
}

impl HttpBackend {
    /// `request_timeout` bounds every individual HTTP call
    pub fn new(base_url: &str, token: Option<String>, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::ConfigError(format!("Invalid backend URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::ConfigError(format!(
                "Backend URL cannot be used as a base: {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Base URL extended by path segments, each percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::ConfigError("Backend URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::ConnectionError(e.to_string()))
    }
}

/// Turn a non-success response into an error carrying status and body
async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    }
}

#[async_trait]
impl ComputeBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn is_available(&self) -> Result<bool> {
        let url = self.endpoint(&["health"])?;
        match self.send(self.client.get(url)).await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("Sandbox API not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedSandbox> {
        let url = self.endpoint(&["sandboxes"])?;
        let body = ProvisionBody {
            repo_url: &request.repo_url,
            runtime: request.runtime,
            vcpus: request.vcpus,
        };

        let response = self.send(self.client.post(url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(BackendError::ProvisionError(error_body(response).await));
        }

        let created: ProvisionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::ProvisionError(format!("Malformed response: {}", e)))?;

        info!(sandbox_id = %request.sandbox_id, handle = %created.id, "Remote sandbox created");

        Ok(ProvisionedSandbox {
            handle: created.id,
            public_url: created.public_url,
        })
    }

    async fn deprovision(&self, handle: &str) -> Result<()> {
        let url = self.endpoint(&["sandboxes", handle])?;
        let response = self.send(self.client.delete(url)).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(handle = %handle, "Remote sandbox already gone");
                Ok(())
            }
            _ => Err(BackendError::InternalError(error_body(response).await)),
        }
    }

    async fn run(&self, handle: &str, command: &str) -> Result<ExecResult> {
        let url = self.endpoint(&["sandboxes", handle, "commands"])?;
        let response = self
            .send(self.client.post(url).json(&RunBody { command }))
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::ExecError(error_body(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::ExecError(format!("Malformed response: {}", e)))
    }
}
