//! Health probing

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use postgen_api::{HealthResponse, StylesResponse, STYLES_PATH};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::deploy::retry::{retry_until, RetryPolicy, SleepFn};
use crate::errors::UpdateError;

/// Liveness probe against the deployed service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One probe; `Ok` means the service answered with a 2xx
    async fn probe(&self) -> Result<(), UpdateError>;

    /// Deeper check run once after the service is up
    async fn smoke(&self) -> Result<(), UpdateError> {
        Ok(())
    }
}

/// HTTP implementation
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    health_url: Url,
    styles_url: Url,
}

impl HttpHealthProbe {
    pub fn new(health_url: Url, timeout: Duration) -> Result<Self, UpdateError> {
        let client = Client::builder().timeout(timeout).build()?;
        let styles_url = health_url
            .join(STYLES_PATH)
            .map_err(|e| UpdateError::ConfigError(format!("Invalid styles URL: {}", e)))?;

        Ok(Self {
            client,
            health_url,
            styles_url,
        })
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<(), UpdateError> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(|e| UpdateError::HealthCheckError(format!("GET {}: {}", self.health_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HealthCheckError(format!(
                "GET {} returned {}",
                self.health_url, status
            )));
        }

        // The body is informational; any 2xx counts as up.
        match response.json::<HealthResponse>().await {
            Ok(health) => debug!("Service reports {:?} ({} checks)", health.status, health.checks.len()),
            Err(e) => debug!("Health body not understood: {}", e),
        }
        Ok(())
    }

    async fn smoke(&self) -> Result<(), UpdateError> {
        let response = self
            .client
            .get(self.styles_url.clone())
            .send()
            .await
            .map_err(|e| UpdateError::HealthCheckError(format!("GET {}: {}", self.styles_url, e)))?;

        if !response.status().is_success() {
            return Err(UpdateError::HealthCheckError(format!(
                "GET {} returned {}",
                self.styles_url,
                response.status()
            )));
        }

        let styles: StylesResponse = response.json().await.map_err(|e| {
            UpdateError::HealthCheckError(format!("Unexpected styles response: {}", e))
        })?;
        if !styles.success || styles.styles.is_empty() {
            return Err(UpdateError::HealthCheckError(
                "Styles endpoint returned no styles".to_string(),
            ));
        }

        debug!("Smoke check passed: {} styles", styles.styles.len());
        Ok(())
    }
}

/// Result of polling the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthOutcome {
    pub healthy: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Poll `probe` under `policy`, then run the smoke check when requested
pub async fn wait_until_healthy(
    probe: &dyn HealthProbe,
    policy: &RetryPolicy,
    sleep_fn: &SleepFn,
    smoke_check: bool,
) -> HealthOutcome {
    let last_error: Mutex<Option<String>> = Mutex::new(None);

    let outcome = retry_until(policy, sleep_fn, |attempt| {
        let last_error = &last_error;
        async move {
            match probe.probe().await {
                Ok(()) => {
                    info!("Health check passed on attempt {}/{}", attempt, policy.max_attempts);
                    true
                }
                Err(e) => {
                    debug!("Health attempt {}/{} failed: {}", attempt, policy.max_attempts, e);
                    if let Ok(mut slot) = last_error.lock() {
                        *slot = Some(e.to_string());
                    }
                    false
                }
            }
        }
    })
    .await;

    if !outcome.succeeded {
        warn!("Service did not become healthy after {} attempts", outcome.attempts);
        return HealthOutcome {
            healthy: false,
            attempts: outcome.attempts,
            last_error: last_error.into_inner().unwrap_or(None),
        };
    }

    if smoke_check {
        if let Err(e) = probe.smoke().await {
            warn!("Smoke check failed: {}", e);
            return HealthOutcome {
                healthy: false,
                attempts: outcome.attempts,
                last_error: Some(e.to_string()),
            };
        }
    }

    HealthOutcome {
        healthy: true,
        attempts: outcome.attempts,
        last_error: None,
    }
}
