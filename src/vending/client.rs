use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::VendingConfig;
use crate::database::models::{VendAttemptOutcome, VendAttemptRecord};
use crate::database::repository::VendAuditSink;
use crate::resilience::circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerError};
use crate::resilience::retry::retry_with_backoff;
use crate::vending::success::is_success;
use crate::vending::types::{VendError, VendRequest, VendResponse};

/// Anything that can deliver a data bundle
#[async_trait]
pub trait Vendor: Send + Sync {
    /// `Ok` with `success == false` is a business rejection from the vendor;
    /// `Err` means the vendor could not be reached or refused the request.
    async fn vend(&self, request: &VendRequest) -> Result<VendResponse, VendError>;

    fn name(&self) -> &str;

    fn breaker_state(&self) -> BreakerState {
        BreakerState::Closed
    }
}

pub struct VendingClient {
    config: VendingConfig,
    http: Client,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<dyn VendAuditSink>,
}

impl VendingClient {
    pub fn new(config: VendingConfig, audit: Arc<dyn VendAuditSink>) -> Result<Self, VendError> {
        let http = Client::builder()
            .timeout(config.attempt_timeout)
            .build()
            .map_err(|e| VendError::Configuration {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        let breaker = Arc::new(CircuitBreaker::new(
            config.provider_name.clone(),
            config.breaker.clone(),
        ));

        Ok(Self {
            config,
            http,
            breaker,
            audit,
        })
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    async fn attempt(
        &self,
        request: &VendRequest,
        key: &str,
        body: &JsonValue,
        attempt: u32,
    ) -> Result<VendResponse, VendError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.attempt_timeout, self.send(key, body))
            .await
            .unwrap_or(Err(VendError::Timeout {
                after: self.config.attempt_timeout,
            }));
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, status_code, error) = match &result {
            Ok(resp) if resp.success => (VendAttemptOutcome::Success, Some(resp.status_code), None),
            Ok(resp) => (VendAttemptOutcome::Rejected, Some(resp.status_code), None),
            Err(e) if e.is_transient() => (
                VendAttemptOutcome::TransientError,
                e.status_code(),
                Some(e.to_string()),
            ),
            Err(e) => (
                VendAttemptOutcome::PermanentError,
                e.status_code(),
                Some(e.to_string()),
            ),
        };

        info!(
            tx_ref = %request.tx_ref,
            provider = %self.config.provider_name,
            attempt,
            duration_ms,
            status = ?status_code,
            outcome = outcome.as_str(),
            "Vend attempt finished"
        );

        let record = VendAttemptRecord {
            tx_ref: request.tx_ref.clone(),
            attempt,
            provider: self.config.provider_name.clone(),
            duration_ms,
            status_code,
            outcome,
            error,
        };
        if let Err(e) = self.audit.record_attempt(&record).await {
            warn!(tx_ref = %request.tx_ref, error = %e, "Failed to record vend attempt");
        }

        result
    }

    async fn send(&self, key: &str, body: &JsonValue) -> Result<VendResponse, VendError> {
        let response = self
            .http
            .post(&self.config.endpoint_url)
            .header("Authorization", format!("Token {}", self.config.api_token))
            .header("Idempotency-Key", key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VendError::Timeout {
                        after: self.config.attempt_timeout,
                    }
                } else {
                    VendError::Connect {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                VendError::Timeout {
                    after: self.config.attempt_timeout,
                }
            } else {
                VendError::Connect {
                    message: format!("failed to read response body: {}", e),
                }
            }
        })?;

        if status.is_server_error() {
            return Err(VendError::Server {
                status: status.as_u16(),
                body: text,
            });
        }
        if !status.is_success() {
            return Err(VendError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        let payload = serde_json::from_str::<JsonValue>(&text)
            .unwrap_or_else(|_| serde_json::json!({ "raw": text }));

        Ok(VendResponse {
            success: is_success(&payload),
            status_code: status.as_u16(),
            payload,
        })
    }
}

#[async_trait]
impl Vendor for VendingClient {
    async fn vend(&self, request: &VendRequest) -> Result<VendResponse, VendError> {
        if self.config.endpoint_url.is_empty() {
            return Err(VendError::Configuration {
                message: "VENDING_ENDPOINT_URL is not set".to_string(),
            });
        }

        let key = request.idempotency_key();
        let body = request.to_payload();

        self.breaker
            .call(
                || {
                    retry_with_backoff(
                        &self.config.retry,
                        |attempt| self.attempt(request, &key, &body, attempt),
                        VendError::is_transient,
                        "vend",
                    )
                },
                VendError::is_transient,
            )
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open { service } => {
                    warn!(tx_ref = %request.tx_ref, "Vend rejected, circuit open");
                    VendError::CircuitOpen { service }
                }
                CircuitBreakerError::Inner(e) => e,
            })
    }

    fn name(&self) -> &str {
        &self.config.provider_name
    }

    fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}
