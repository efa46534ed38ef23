use crate::config::{GatewayConfig, SecurityConfig};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    PaymentState, StatusResponse, WebhookEvent, WebhookVerificationResult,
};
use crate::payments::utils::{parse_amount, secure_eq, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl FlutterwaveConfig {
    pub fn from_app(gateway: &GatewayConfig, security: &SecurityConfig) -> Self {
        Self {
            secret_key: gateway.secret_key.clone(),
            webhook_secret: Some(security.webhook_secret.clone())
                .filter(|secret| !secret.trim().is_empty()),
            base_url: gateway.base_url.trim_end_matches('/').to_string(),
            timeout_secs: gateway.timeout_secs,
            max_retries: 2,
        }
    }
}

pub struct FlutterwaveGateway {
    config: FlutterwaveConfig,
    http: PaymentHttpClient,
}

impl FlutterwaveGateway {
    pub fn new(config: FlutterwaveConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn string_field(data: &JsonValue, key: &str) -> Option<String> {
        data.get(key).and_then(|v| match v {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    async fn verify_by_reference(&self, tx_ref: &str) -> PaymentResult<StatusResponse> {
        if tx_ref.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "tx_ref is required".to_string(),
                field: Some("tx_ref".to_string()),
            });
        }
        if self.config.secret_key.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "FLUTTERWAVE_SECRET_KEY is not configured".to_string(),
                field: Some("FLUTTERWAVE_SECRET_KEY".to_string()),
            });
        }

        let url = format!(
            "{}?tx_ref={}",
            self.endpoint("/transactions/verify_by_reference"),
            tx_ref.trim()
        );
        let raw: FlutterwaveEnvelope = self.http.get_json(&url, &self.config.secret_key).await?;

        if !raw.status.eq_ignore_ascii_case("success") {
            return Err(PaymentError::ProviderError {
                provider: "flutterwave".to_string(),
                message: raw.message,
                provider_code: None,
                retryable: false,
            });
        }

        let data = raw.data.unwrap_or_else(|| serde_json::json!({}));
        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .map(PaymentState::from_provider_status)
            .unwrap_or(PaymentState::Unknown);

        debug!(tx_ref = %tx_ref, status = ?status, "flutterwave verification response");

        Ok(StatusResponse {
            status,
            transaction_reference: Self::string_field(&data, "tx_ref"),
            provider_reference: Self::string_field(&data, "flw_ref"),
            amount: data.get("amount").and_then(parse_amount),
            currency: Self::string_field(&data, "currency"),
            failure_reason: Self::string_field(&data, "processor_response"),
            provider_data: Some(data),
        })
    }

    fn name(&self) -> &'static str {
        "flutterwave"
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let expected = self
            .config
            .webhook_secret
            .as_deref()
            .ok_or(PaymentError::WebhookVerificationError {
                message: "FLUTTERWAVE_WEBHOOK_SECRET is not configured".to_string(),
            })?;
        let valid = secure_eq(expected.trim().as_bytes(), signature.trim().as_bytes());
        if !valid {
            warn!("flutterwave webhook hash mismatch");
        }
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid flutterwave webhook hash".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid webhook JSON payload: {}", e),
                field: None,
            })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed
            .get("data")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .map(PaymentState::from_provider_status);

        let provider_reference = Self::string_field(&data, "flw_ref")
            .or_else(|| Self::string_field(&data, "id"))
            .or_else(|| Self::string_field(&data, "reference"));

        Ok(WebhookEvent {
            event_type,
            transaction_reference: Self::string_field(&data, "tx_ref"),
            provider_reference,
            account_number: Self::string_field(&data, "account_number"),
            status,
            amount: data.get("amount").and_then(parse_amount),
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FlutterwaveEnvelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<JsonValue>,
}
