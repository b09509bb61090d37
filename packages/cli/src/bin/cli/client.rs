// ABOUTME: Minimal HTTP client for the devbox API used by the sandbox subcommands
// ABOUTME: Unwraps the {success, data, error} envelope into anyhow results

use anyhow::{anyhow, Context, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API URL: {}", base_url))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    /// Base URL extended by path segments, each percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>> {
        self.send::<(), T>(Method::GET, segments, None).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<Option<T>> {
        self.send(Method::POST, segments, body).await
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<Option<T>> {
        let url = self.endpoint(segments)?;

        let mut request = self.http.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach devbox server at {}", self.base_url))?;
        let status = response.status();
        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Unexpected response from {} ({})", url, status))?;

        if !envelope.success {
            return Err(anyhow!(
                "{}",
                envelope
                    .error
                    .unwrap_or_else(|| describe_status(status).to_string())
            ));
        }
        Ok(envelope.data)
    }
}

fn describe_status(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("request failed")
}
