//! Telemetry source client.

pub mod snapshot;

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::TelemetryConfig;
use crate::error::UpstreamError;

pub use snapshot::{Observation, Snapshot};

/// Something that can produce one snapshot of current station readings.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot, UpstreamError>;
}

/// HTTP client for the water level API. Issues exactly one GET per call;
/// retrying is left to the next scheduler tick.
pub struct TelemetryClient {
    client: reqwest::Client,
    url: String,
    scope: (String, String),
    timeout: Duration,
}

impl TelemetryClient {
    pub fn new(config: &TelemetryConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            scope: (config.scope_param.clone(), config.scope_value.clone()),
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl TelemetrySource for TelemetryClient {
    async fn fetch(&self) -> Result<Snapshot, UpstreamError> {
        let request = self
            .client
            .get(&self.url)
            .query(&[(&self.scope.0, &self.scope.1)])
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;
        debug!(bytes = body.len(), url = %self.url, "Fetched telemetry snapshot");

        Snapshot::from_slice(&body)
    }
}
