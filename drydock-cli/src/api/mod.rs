//! API client module
//!
//! HTTP client for the poller's debug API.

use anyhow::{Context, Result};
use drydock_core::dto::health::HealthReport;
use drydock_core::dto::polling::{
    PollingSnapshot, RemoveEntryResponse, RescheduleResponse, TickResponse,
};
use reqwest::{Client, StatusCode};

/// HTTP client for the poller debug API
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the poller's debug API
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Fetch the health report
    ///
    /// An unhealthy poller answers 503 with the report as body, which is
    /// still a valid answer here.
    pub async fn health(&self) -> Result<HealthReport> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send health request")?;

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return response
                .json()
                .await
                .context("Failed to parse health report");
        }
        self.handle_response(response).await
    }

    /// Fetch the polling snapshot
    pub async fn snapshot(&self) -> Result<PollingSnapshot> {
        let url = format!("{}/debug/polling", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send snapshot request")?;

        self.handle_response(response).await
    }

    /// Ask the poller to re-derive its intervals
    pub async fn reschedule(&self) -> Result<RescheduleResponse> {
        let url = format!("{}/debug/polling/reschedule", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to send reschedule request")?;

        self.handle_response(response).await
    }

    /// Submit every due entry now
    pub async fn tick(&self) -> Result<TickResponse> {
        let url = format!("{}/debug/polling/tick", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to send tick request")?;

        self.handle_response(response).await
    }

    /// Drop a workload's schedule entry
    ///
    /// # Arguments
    /// * `workload` - The workload id
    pub async fn remove_entry(&self, workload: &str) -> Result<RemoveEntryResponse> {
        let url = format!("{}/debug/polling/entries/{}", self.base_url, workload);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send remove entry request")?;

        self.handle_response(response).await
    }

    /// Forget every cached digest
    pub async fn clear_cache(&self) -> Result<()> {
        let url = format!("{}/debug/cache", self.base_url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send clear cache request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Request failed with status {}: {}", status, error_text);
        }

        Ok(())
    }

    /// Handle API response and deserialize JSON
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Request failed with status {}: {}", status, error_text);
        }

        response
            .json()
            .await
            .context("Failed to parse response JSON")
    }
}
