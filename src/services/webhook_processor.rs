use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::models::TxStatus;
use crate::database::repository::TransactionStore;
use crate::error::{AppError, SecurityError, ValidationError};
use crate::payments::{PaymentGateway, WebhookEvent};
use crate::services::delivery::DeliveryService;
use crate::services::ledger::{FundingOutcome, FundingRequest, WalletLedger};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Processing error: {0}")]
    Processing(AppError),
}

impl From<AppError> for WebhookProcessorError {
    fn from(err: AppError) -> Self {
        WebhookProcessorError::Processing(err)
    }
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::InvalidSignature => {
                AppError::security(SecurityError::InvalidWebhookSignature)
            }
            WebhookProcessorError::MalformedPayload(message) => {
                AppError::validation(ValidationError::MissingField {
                    field: format!("body ({})", message),
                })
            }
            WebhookProcessorError::Processing(err) => err,
        }
    }
}

/// How a notification was classified and what it changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    FundingCredited { agent_id: Uuid, gateway_ref: String },
    FundingDuplicate { gateway_ref: String },
    FundingUnclaimed { account_number: String },
    FundingNotSuccessful,
    CheckoutSettled { tx_ref: String, status: TxStatus },
    CheckoutAlreadySettled { tx_ref: String },
    CheckoutNotPaid { tx_ref: String },
    CheckoutUnknown { tx_ref: String },
    Unclassified,
}

/// Gateway notification handling: wallet funding and checkout confirmation
pub struct WebhookProcessor {
    gateway: Arc<dyn PaymentGateway>,
    transactions: Arc<dyn TransactionStore>,
    delivery: Arc<DeliveryService>,
    ledger: Arc<WalletLedger>,
}

impl WebhookProcessor {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        transactions: Arc<dyn TransactionStore>,
        delivery: Arc<DeliveryService>,
        ledger: Arc<WalletLedger>,
    ) -> Self {
        Self {
            gateway,
            transactions,
            delivery,
            ledger,
        }
    }

    /// Verify, classify and apply one notification. Anything short of a bad
    /// signature or unreadable body is acknowledged; delivery problems are
    /// recorded on the transaction instead of being reported back.
    pub async fn process(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let signature = signature.ok_or_else(|| {
            warn!(
                target: "security",
                gateway = self.gateway.name(),
                "Webhook without signature header"
            );
            WebhookProcessorError::InvalidSignature
        })?;

        let verification = self.gateway.verify_webhook(body, signature).map_err(|e| {
            error!(target: "security", error = %e, "Webhook signature check unavailable");
            WebhookProcessorError::InvalidSignature
        })?;
        if !verification.valid {
            warn!(
                target: "security",
                gateway = self.gateway.name(),
                reason = ?verification.reason,
                "Rejected webhook with invalid signature"
            );
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = self
            .gateway
            .parse_webhook_event(body)
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;

        if let Some(account_number) = event.account_number.clone() {
            return self.process_funding(&event, account_number).await;
        }
        if let Some(tx_ref) = event.transaction_reference.clone() {
            return self.process_checkout(&event, tx_ref).await;
        }

        info!(event_type = %event.event_type, "Unclassified webhook acknowledged");
        Ok(WebhookOutcome::Unclassified)
    }

    async fn process_funding(
        &self,
        event: &WebhookEvent,
        account_number: String,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        if !event.is_successful() {
            info!(
                account_number = %account_number,
                status = ?event.status,
                "Funding not successful, ignored"
            );
            return Ok(WebhookOutcome::FundingNotSuccessful);
        }
        let gateway_ref = event.gateway_reference().map(str::to_string).ok_or_else(|| {
            WebhookProcessorError::MalformedPayload("funding event has no reference".to_string())
        })?;
        let amount = event.amount.clone().ok_or_else(|| {
            WebhookProcessorError::MalformedPayload("funding event has no amount".to_string())
        })?;

        let outcome = self
            .ledger
            .fund(FundingRequest {
                account_number: account_number.clone(),
                gateway_ref: gateway_ref.clone(),
                amount,
                payload: event.payload.clone(),
            })
            .await
            .map_err(AppError::from)?;

        Ok(match outcome {
            FundingOutcome::Credited(balances) => WebhookOutcome::FundingCredited {
                agent_id: balances.agent_id,
                gateway_ref,
            },
            FundingOutcome::Duplicate => WebhookOutcome::FundingDuplicate { gateway_ref },
            FundingOutcome::UnknownAccount => WebhookOutcome::FundingUnclaimed { account_number },
        })
    }

    async fn process_checkout(
        &self,
        event: &WebhookEvent,
        tx_ref: String,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let Some(tx) = self.transactions.find_by_ref(&tx_ref).await.map_err(AppError::from)? else {
            warn!(tx_ref = %tx_ref, "Webhook for unknown transaction");
            return Ok(WebhookOutcome::CheckoutUnknown { tx_ref });
        };

        if matches!(tx.status, TxStatus::Paid | TxStatus::Delivered) {
            info!(tx_ref = %tx_ref, status = %tx.status, "Webhook for settled transaction, no-op");
            return Ok(WebhookOutcome::CheckoutAlreadySettled { tx_ref });
        }
        if tx.status != TxStatus::Pending || tx.is_agent_wallet_purchase() {
            return Ok(WebhookOutcome::CheckoutNotPaid { tx_ref });
        }

        let settled = event.amount.clone().unwrap_or_else(|| BigDecimal::from(0));
        if !event.is_successful() || settled < tx.amount {
            warn!(
                tx_ref = %tx_ref,
                status = ?event.status,
                expected = %tx.amount,
                received = %settled,
                "Webhook does not confirm full payment"
            );
            return Ok(WebhookOutcome::CheckoutNotPaid { tx_ref });
        }

        if self
            .transactions
            .mark_paid(&tx_ref, event.payload.clone())
            .await
            .map_err(AppError::from)?
        {
            info!(tx_ref = %tx_ref, "Payment confirmed by webhook");
        }

        let current = self
            .transactions
            .find_by_ref(&tx_ref)
            .await
            .map_err(AppError::from)?
            .unwrap_or(tx);
        // Payment is recorded by now; delivery errors are left to the monitor.
        let current = if current.awaits_fulfilment() {
            match self.delivery.fulfil(&current).await {
                Ok(after) => after,
                Err(e) => {
                    error!(tx_ref = %tx_ref, error = %e, "Fulfilment after webhook payment failed");
                    match self.transactions.find_by_ref(&tx_ref).await {
                        Ok(Some(stored)) => stored,
                        _ => current,
                    }
                }
            }
        } else {
            current
        };

        Ok(WebhookOutcome::CheckoutSettled {
            tx_ref,
            status: current.status,
        })
    }
}
