//! Manual overrides. Every action is logged on the `security` target.

use bigdecimal::BigDecimal;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::database::models::{AdjustmentDirection, BalanceSnapshot, Transaction};
use crate::database::repository::TransactionStore;
use crate::error::{AppError, DomainError, ValidationError};
use crate::services::ledger::WalletLedger;

pub struct AdminService {
    transactions: Arc<dyn TransactionStore>,
    ledger: Arc<WalletLedger>,
}

impl AdminService {
    pub fn new(transactions: Arc<dyn TransactionStore>, ledger: Arc<WalletLedger>) -> Self {
        Self {
            transactions,
            ledger,
        }
    }

    /// Release a failed delivery so the next verification retries it. Only
    /// allowed while the transaction is still `paid`.
    pub async fn reset_delivery(&self, tx_ref: &str, actor: &str) -> Result<Transaction, AppError> {
        let tx = self.transactions.find_by_ref(tx_ref).await?.ok_or_else(|| {
            AppError::domain(DomainError::TransactionNotFound {
                tx_ref: tx_ref.to_string(),
            })
        })?;

        if !self.transactions.reset_delivery(tx_ref).await? {
            return Err(AppError::domain(DomainError::DeliveryNotResettable {
                tx_ref: tx_ref.to_string(),
                state: format!("{}/{}", tx.status, tx.delivery_state),
            }));
        }

        warn!(
            target: "security",
            action = "reset_delivery",
            actor = %actor,
            tx_ref = %tx_ref,
            previous_failure = ?tx.delivery_data,
            "Admin reset delivery claim"
        );

        self.transactions.find_by_ref(tx_ref).await?.ok_or_else(|| {
            AppError::domain(DomainError::TransactionNotFound {
                tx_ref: tx_ref.to_string(),
            })
        })
    }

    pub async fn adjust(
        &self,
        agent_id: Uuid,
        direction: AdjustmentDirection,
        amount: BigDecimal,
        reason: &str,
        actor: &str,
    ) -> Result<BalanceSnapshot, AppError> {
        if reason.trim().is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "reason".to_string(),
            }));
        }
        let balances = self
            .ledger
            .admin_adjust(agent_id, direction, amount.clone(), reason.trim())
            .await?;

        warn!(
            target: "security",
            action = "adjust_balance",
            actor = %actor,
            agent_id = %agent_id,
            direction = direction.as_str(),
            amount = %amount,
            reason = %reason,
            "Admin balance adjustment"
        );
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::{DeliveryState, NewTransaction, TxKind, TxStatus};
    use crate::services::catalog::StaticPlanCatalog;
    use crate::vending::{VendError, VendRequest, VendResponse, Vendor};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoVendor;

    #[async_trait]
    impl Vendor for NoVendor {
        async fn vend(&self, _request: &VendRequest) -> Result<VendResponse, VendError> {
            Err(VendError::Connect {
                message: "unused".to_string(),
            })
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    fn admin(store: Arc<MemoryStore>) -> AdminService {
        let ledger = Arc::new(WalletLedger::new(
            store.clone(),
            store.clone(),
            Arc::new(NoVendor),
            Arc::new(StaticPlanCatalog::builtin()),
            BigDecimal::from(0),
        ));
        AdminService::new(store, ledger)
    }

    async fn failed_delivery(store: &MemoryStore, status: TxStatus) {
        store
            .seed_transaction(
                NewTransaction {
                    tx_ref: "SAUKI-ADM-1".to_string(),
                    kind: TxKind::Data,
                    amount: BigDecimal::from(300),
                    phone: "08031234567".to_string(),
                    agent_id: None,
                    plan_id: Some("mtn-1gb".to_string()),
                    network: None,
                    ported: false,
                },
                status,
            )
            .unwrap();
        assert!(store.try_claim("SAUKI-ADM-1", json!({})).await.unwrap());
        assert!(store
            .fail_delivery("SAUKI-ADM-1", json!({ "error": "timeout" }))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reset_releases_failed_paid_delivery() {
        let store = Arc::new(MemoryStore::new());
        failed_delivery(&store, TxStatus::Paid).await;

        let tx = admin(store.clone()).reset_delivery("SAUKI-ADM-1", "ops").await.unwrap();
        assert_eq!(tx.delivery_state, DeliveryState::Unclaimed);
        assert!(tx.delivery_data.is_none());
    }

    #[tokio::test]
    async fn reset_refuses_unless_failed_and_paid() {
        let store = Arc::new(MemoryStore::new());
        failed_delivery(&store, TxStatus::Pending).await;

        let err = admin(store.clone())
            .reset_delivery("SAUKI-ADM-1", "ops")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);

        let err = admin(store).reset_delivery("missing", "ops").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn adjustment_requires_a_reason() {
        let store = Arc::new(MemoryStore::new());
        let err = admin(store)
            .adjust(Uuid::new_v4(), AdjustmentDirection::Credit, BigDecimal::from(5), " ", "ops")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
