//! Drives a transaction forward from whatever the gateway says about it.
//!
//! Safe to call any number of times from polling clients, the monitor and
//! webhooks at once. "Not settled yet" is a normal answer, and a gateway
//! outage leaves the transaction where it was.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::models::{DeliveryState, Transaction, TxStatus};
use crate::database::repository::TransactionStore;
use crate::error::{AppError, DomainError};
use crate::payments::{PaymentGateway, PaymentState};
use crate::services::delivery::DeliveryService;

/// What a polling caller is told
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerificationOutcome {
    pub tx_ref: String,
    pub status: TxStatus,
    pub delivery_state: DeliveryState,
    pub reason: String,
}

impl VerificationOutcome {
    pub fn from_transaction(tx: &Transaction) -> Self {
        let reason = match (tx.status, tx.delivery_state) {
            (TxStatus::Pending, _) => "awaiting payment confirmation",
            (TxStatus::Paid, DeliveryState::Unclaimed) if tx.kind.requires_fulfilment() => {
                "payment confirmed, delivery queued"
            }
            (TxStatus::Paid, DeliveryState::Claiming) => "payment confirmed, delivery in progress",
            (TxStatus::Paid, DeliveryState::Failed) => {
                "payment confirmed, delivery failed and is awaiting support"
            }
            (TxStatus::Paid, _) => "payment confirmed",
            (TxStatus::Delivered, _) => "delivered",
            (TxStatus::Failed, _) => {
                let settlement_race = tx
                    .delivery_data
                    .as_ref()
                    .and_then(|d| d.get("reason"))
                    .and_then(|r| r.as_str())
                    == Some("insufficient_balance_at_settlement");
                if settlement_race {
                    "wallet balance changed before settlement, under review"
                } else {
                    "payment failed"
                }
            }
        };
        Self {
            tx_ref: tx.tx_ref.clone(),
            status: tx.status,
            delivery_state: tx.delivery_state,
            reason: reason.to_string(),
        }
    }
}

pub struct PaymentVerifier {
    transactions: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    delivery: Arc<DeliveryService>,
}

impl PaymentVerifier {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        delivery: Arc<DeliveryService>,
    ) -> Self {
        Self {
            transactions,
            gateway,
            delivery,
        }
    }

    pub async fn verify(&self, tx_ref: &str) -> Result<VerificationOutcome, AppError> {
        let tx = self
            .transactions
            .find_by_ref(tx_ref)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TransactionNotFound {
                    tx_ref: tx_ref.to_string(),
                })
            })?;
        let tx = self.advance(tx).await?;
        Ok(VerificationOutcome::from_transaction(&tx))
    }

    /// Move one loaded transaction as far as it can go right now.
    pub async fn advance(&self, tx: Transaction) -> Result<Transaction, AppError> {
        if tx.status == TxStatus::Delivered {
            return Ok(tx);
        }
        if tx.is_agent_wallet_purchase() {
            // Settled synchronously through the wallet ledger.
            return Ok(tx);
        }

        let tx = if tx.status == TxStatus::Pending {
            self.check_gateway(tx).await?
        } else {
            tx
        };

        if tx.awaits_fulfilment() {
            return self.delivery.fulfil(&tx).await;
        }
        Ok(tx)
    }

    async fn check_gateway(&self, tx: Transaction) -> Result<Transaction, AppError> {
        let status = match self.gateway.verify_by_reference(&tx.tx_ref).await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    tx_ref = %tx.tx_ref,
                    gateway = self.gateway.name(),
                    error = %e,
                    "Gateway verification failed, status unchanged"
                );
                return Ok(tx);
            }
        };

        if status.covers(&tx.amount) {
            let payload = status.provider_data.clone().unwrap_or_else(|| json!({}));
            if self.transactions.mark_paid(&tx.tx_ref, payload).await? {
                info!(tx_ref = %tx.tx_ref, amount = %tx.amount, "Payment confirmed");
            }
        } else if status.status == PaymentState::Success {
            warn!(
                tx_ref = %tx.tx_ref,
                expected = %tx.amount,
                received = ?status.amount.as_ref().map(|a| a.to_string()),
                "Under-payment, leaving transaction pending"
            );
        } else if status.status == PaymentState::Failed {
            let reason = json!({
                "gateway_status": "failed",
                "reason": status.failure_reason,
            });
            if self
                .transactions
                .mark_failed(&tx.tx_ref, TxStatus::Pending, reason)
                .await?
            {
                info!(tx_ref = %tx.tx_ref, "Gateway reports payment failed");
            }
        } else {
            debug!(tx_ref = %tx.tx_ref, status = ?status.status, "Payment not settled yet");
        }

        // A concurrent writer may have moved it too; report what is stored.
        self.reload(tx).await
    }

    async fn reload(&self, tx: Transaction) -> Result<Transaction, AppError> {
        Ok(self
            .transactions
            .find_by_ref(&tx.tx_ref)
            .await?
            .unwrap_or(tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TxKind;
    use chrono::Utc;

    fn tx(status: TxStatus, delivery_state: DeliveryState) -> Transaction {
        Transaction {
            tx_ref: "T".to_string(),
            kind: TxKind::Data,
            status,
            amount: bigdecimal::BigDecimal::from(300),
            phone: "08031234567".to_string(),
            agent_id: None,
            plan_id: Some("mtn-1gb".to_string()),
            network: None,
            ported: false,
            gateway_response: None,
            delivery_state,
            delivery_data: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn reasons_follow_status_and_delivery() {
        let pending =
            VerificationOutcome::from_transaction(&tx(TxStatus::Pending, DeliveryState::Unclaimed));
        assert_eq!(pending.reason, "awaiting payment confirmation");

        let failed_delivery =
            VerificationOutcome::from_transaction(&tx(TxStatus::Paid, DeliveryState::Failed));
        assert!(failed_delivery.reason.contains("delivery failed"));

        let mut raced = tx(TxStatus::Failed, DeliveryState::Fulfilled);
        raced.delivery_data = Some(json!({ "reason": "insufficient_balance_at_settlement" }));
        assert!(VerificationOutcome::from_transaction(&raced).reason.contains("under review"));
    }

    #[test]
    fn outcome_never_carries_provider_payload() {
        let mut delivered = tx(TxStatus::Delivered, DeliveryState::Fulfilled);
        delivered.delivery_data = Some(json!({ "response": { "token": "secret" } }));
        let body = serde_json::to_value(VerificationOutcome::from_transaction(&delivered)).unwrap();
        assert!(body.get("delivery_data").is_none());
        assert_eq!(body["status"], json!("delivered"));
    }
}
