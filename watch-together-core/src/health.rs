//! Relay Health Probe
//!
//! `GET {relay}/health` must answer `200` with the body `ok` (surrounding
//! whitespace allowed). Anything else, including no answer in time, is
//! reported as unreachable. The probe never touches session state.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::SyncConfig;

/// Why the relay was judged unhealthy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("no answer within {0:?}")]
    TimedOut(Duration),

    #[error("unexpected response (HTTP {status})")]
    Unexpected { status: u16 },
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unreachable(HealthError),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Probes the relay's health endpoint
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    http: Client,
    url: String,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_url(config.health_url(), config.health_timeout)
    }

    /// Probe an explicit health URL
    pub fn with_url(url: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(1)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to a default HTTP client: {}", e);
                Client::new()
            });

        Self {
            http,
            url: url.into(),
            timeout,
        }
    }

    /// Check the relay once
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn probe(&self) -> HealthStatus {
        match tokio::time::timeout(self.timeout, self.fetch()).await {
            Ok(Ok(())) => {
                debug!("Relay healthy");
                HealthStatus::Healthy
            }
            Ok(Err(e)) => {
                warn!("Relay unhealthy: {}", e);
                HealthStatus::Unreachable(e)
            }
            Err(_) => {
                warn!("Relay health check timed out");
                HealthStatus::Unreachable(HealthError::TimedOut(self.timeout))
            }
        }
    }

    async fn fetch(&self) -> Result<(), HealthError> {
        let resp = self.http.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                HealthError::TimedOut(self.timeout)
            } else {
                HealthError::Request(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| HealthError::Request(e.to_string()))?;
        debug!("Health response: HTTP {} {:?}", status, body);

        if is_healthy_response(status, &body) {
            Ok(())
        } else {
            Err(HealthError::Unexpected { status })
        }
    }
}

/// The relay is healthy only on `200` with body `ok`
pub fn is_healthy_response(status: u16, body: &str) -> bool {
    status == 200 && body.trim() == "ok"
}
