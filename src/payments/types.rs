use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Gateway's view of a payment, normalised
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Success,
    Failed,
    Unknown,
}

impl PaymentState {
    pub fn from_provider_status(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "successful" | "success" => PaymentState::Success,
            "pending" | "new" | "processing" => PaymentState::Pending,
            "failed" | "cancelled" => PaymentState::Failed,
            _ => PaymentState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: PaymentState,
    pub transaction_reference: Option<String>,
    pub provider_reference: Option<String>,
    /// Settled amount as reported by the gateway
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub failure_reason: Option<String>,
    pub provider_data: Option<JsonValue>,
}

impl StatusResponse {
    /// Paid means the gateway says successful and settled at least `expected`.
    pub fn covers(&self, expected: &BigDecimal) -> bool {
        self.status == PaymentState::Success
            && self.amount.as_ref().map(|a| a >= expected).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

/// Fields of an inbound gateway notification the engine consumes
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub transaction_reference: Option<String>,
    pub provider_reference: Option<String>,
    /// Virtual account that received a transfer (wallet funding)
    pub account_number: Option<String>,
    pub status: Option<PaymentState>,
    pub amount: Option<BigDecimal>,
    pub payload: JsonValue,
    pub received_at: String,
}

impl WebhookEvent {
    pub fn is_successful(&self) -> bool {
        self.status == Some(PaymentState::Success)
    }

    /// Reference the gateway uses for this money movement
    pub fn gateway_reference(&self) -> Option<&str> {
        self.provider_reference
            .as_deref()
            .or(self.transaction_reference.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn maps_provider_statuses() {
        assert_eq!(PaymentState::from_provider_status("successful"), PaymentState::Success);
        assert_eq!(PaymentState::from_provider_status("Cancelled"), PaymentState::Failed);
        assert_eq!(PaymentState::from_provider_status("pending"), PaymentState::Pending);
        assert_eq!(PaymentState::from_provider_status("reversed"), PaymentState::Unknown);
        // Not a payment outcome; never enough to release value.
        assert_eq!(PaymentState::from_provider_status("completed"), PaymentState::Unknown);
    }

    #[test]
    fn under_payment_does_not_cover() {
        let response = StatusResponse {
            status: PaymentState::Success,
            transaction_reference: Some("SAUKI-COM-1".to_string()),
            provider_reference: None,
            amount: Some(BigDecimal::from_str("4999.99").unwrap()),
            currency: Some("NGN".to_string()),
            failure_reason: None,
            provider_data: None,
        };
        assert!(!response.covers(&BigDecimal::from(5000)));
        assert!(response.covers(&BigDecimal::from(4999)));
    }
}
