use crate::payments::error::PaymentResult;
use crate::payments::types::{StatusResponse, WebhookEvent, WebhookVerificationResult};
use async_trait::async_trait;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the gateway for the state of a payment by our reference.
    async fn verify_by_reference(&self, tx_ref: &str) -> PaymentResult<StatusResponse>;

    fn name(&self) -> &'static str;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentState;
    use bigdecimal::BigDecimal;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn verify_by_reference(&self, tx_ref: &str) -> PaymentResult<StatusResponse> {
            Ok(StatusResponse {
                status: PaymentState::Success,
                transaction_reference: Some(tx_ref.to_string()),
                provider_reference: Some("mock_ref".to_string()),
                amount: Some(BigDecimal::from(5000)),
                currency: Some("NGN".to_string()),
                failure_reason: None,
                provider_data: None,
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            signature: &str,
        ) -> PaymentResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult {
                valid: signature == "ok",
                reason: None,
            })
        }

        fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
            Ok(WebhookEvent {
                event_type: "mock".to_string(),
                transaction_reference: None,
                provider_reference: None,
                account_number: None,
                status: None,
                amount: None,
                payload: serde_json::from_slice(payload).unwrap_or_default(),
                received_at: chrono::Utc::now().to_rfc3339(),
            })
        }
    }

    #[tokio::test]
    async fn gateway_trait_is_object_safe() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let status = gateway.verify_by_reference("SAUKI-COM-1").await.unwrap();
        assert!(status.covers(&BigDecimal::from(5000)));
        assert!(gateway.verify_webhook(b"{}", "ok").unwrap().valid);
    }
}
