//! Client for the daemon's HTTP endpoints

use anyhow::{Context, Result};
use hostwatch_core::{health::HealthResponse, AgentStatus};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Client for a running hostwatch daemon
pub struct DaemonClient {
    client: Client,
    base_url: Url,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid daemon URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach hostwatch daemon")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Daemon error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<AgentStatus> {
        self.get("status").await
    }

    /// Component health; served with 503 when unhealthy, so read regardless
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.base_url.join("healthz").context("Invalid path")?;
        self.client
            .get(url)
            .send()
            .await
            .context("Failed to reach hostwatch daemon")?
            .json()
            .await
            .context("Failed to parse health response")
    }
}
