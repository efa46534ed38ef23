//! Exactly-once fulfilment of paid transactions.
//!
//! The claim is a conditional `unclaimed -> claiming` write on the
//! transaction row. Whoever wins it vends and records the result; everyone
//! else just re-reads. A claim is never released automatically; a failed
//! delivery stays failed until an admin resets it.

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::database::models::{Transaction, TxStatus};
use crate::database::repository::TransactionStore;
use crate::error::{AppError, DomainError};
use crate::services::catalog::PlanCatalog;
use crate::vending::{Network, VendRequest, Vendor};

pub struct DeliveryService {
    transactions: Arc<dyn TransactionStore>,
    vendor: Arc<dyn Vendor>,
    catalog: Arc<dyn PlanCatalog>,
}

impl DeliveryService {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        vendor: Arc<dyn Vendor>,
        catalog: Arc<dyn PlanCatalog>,
    ) -> Self {
        Self {
            transactions,
            vendor,
            catalog,
        }
    }

    /// Fulfil `tx` if it is paid and nobody has claimed it. Returns the
    /// transaction as stored afterwards.
    pub async fn fulfil(&self, tx: &Transaction) -> Result<Transaction, AppError> {
        if tx.status != TxStatus::Paid || !tx.kind.requires_fulfilment() {
            return self.reload(&tx.tx_ref).await;
        }

        let marker = json!({
            "claimed_at": Utc::now().to_rfc3339(),
            "provider": self.vendor.name(),
        });
        if !self.transactions.try_claim(&tx.tx_ref, marker).await? {
            debug!(tx_ref = %tx.tx_ref, "Delivery already claimed elsewhere");
            return self.reload(&tx.tx_ref).await;
        }
        info!(tx_ref = %tx.tx_ref, "Delivery claimed");

        let request = match vend_request_for(tx, self.catalog.as_ref()) {
            Ok(request) => request,
            Err(reason) => {
                error!(tx_ref = %tx.tx_ref, reason = %reason, "Cannot build vend request");
                self.record_failure(
                    &tx.tx_ref,
                    json!({
                        "error": reason,
                        "transient": false,
                        "failed_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await?;
                return self.reload(&tx.tx_ref).await;
            }
        };

        match self.vendor.vend(&request).await {
            Ok(response) if response.success => {
                let result = json!({
                    "provider": self.vendor.name(),
                    "status_code": response.status_code,
                    "response": response.payload,
                    "delivered_at": Utc::now().to_rfc3339(),
                });
                if self.transactions.complete_delivery(&tx.tx_ref, result).await? {
                    info!(tx_ref = %tx.tx_ref, "Data delivered");
                } else {
                    error!(tx_ref = %tx.tx_ref, "Delivered but claim no longer held");
                }
            }
            Ok(response) => {
                warn!(
                    tx_ref = %tx.tx_ref,
                    status_code = response.status_code,
                    "Vendor rejected delivery"
                );
                self.record_failure(
                    &tx.tx_ref,
                    json!({
                        "error": "vendor_rejected",
                        "transient": false,
                        "status_code": response.status_code,
                        "response": response.payload,
                        "failed_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await?;
            }
            Err(e) => {
                warn!(tx_ref = %tx.tx_ref, error = %e, "Delivery failed");
                let mut failure = e.to_failure_payload();
                failure["failed_at"] = JsonValue::String(Utc::now().to_rfc3339());
                self.record_failure(&tx.tx_ref, failure).await?;
            }
        }

        self.reload(&tx.tx_ref).await
    }

    async fn record_failure(&self, tx_ref: &str, failure: JsonValue) -> Result<(), AppError> {
        if !self.transactions.fail_delivery(tx_ref, failure).await? {
            error!(tx_ref = %tx_ref, "Delivery failure not recorded, claim no longer held");
        }
        Ok(())
    }

    async fn reload(&self, tx_ref: &str) -> Result<Transaction, AppError> {
        self.transactions
            .find_by_ref(tx_ref)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TransactionNotFound {
                    tx_ref: tx_ref.to_string(),
                })
            })
    }
}

/// Vend parameters captured on the transaction at purchase time. The plan
/// supplies the vendor-side id and, when nothing was captured, the network;
/// the amount is never re-derived.
pub fn vend_request_for(
    tx: &Transaction,
    catalog: &dyn PlanCatalog,
) -> Result<VendRequest, String> {
    let plan_id = tx.plan_id.as_deref().ok_or("transaction has no plan")?;
    let plan = catalog
        .find(plan_id)
        .ok_or_else(|| format!("unknown plan {}", plan_id))?;
    let network = tx
        .network
        .as_deref()
        .and_then(Network::from_name)
        .unwrap_or(plan.network);

    Ok(VendRequest {
        tx_ref: tx.tx_ref.clone(),
        network,
        mobile_number: tx.phone.clone(),
        plan: plan.vendor_plan,
        ported: tx.ported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::{DeliveryState, NewTransaction, TxKind};
    use crate::services::catalog::StaticPlanCatalog;
    use crate::vending::{VendError, VendResponse};
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingVendor {
        calls: AtomicU32,
        result: Result<VendResponse, VendError>,
    }

    #[async_trait]
    impl Vendor for CountingVendor {
        async fn vend(&self, _request: &VendRequest) -> Result<VendResponse, VendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.result.clone()
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn vendor(result: Result<VendResponse, VendError>) -> Arc<CountingVendor> {
        Arc::new(CountingVendor {
            calls: AtomicU32::new(0),
            result,
        })
    }

    fn delivered() -> Result<VendResponse, VendError> {
        Ok(VendResponse {
            success: true,
            status_code: 200,
            payload: json!({ "Status": "successful" }),
        })
    }

    async fn paid_tx(store: &MemoryStore, tx_ref: &str) -> Transaction {
        store
            .seed_transaction(
                NewTransaction {
                    tx_ref: tx_ref.to_string(),
                    kind: TxKind::Data,
                    amount: BigDecimal::from(1500),
                    phone: "08031234567".to_string(),
                    agent_id: None,
                    plan_id: Some("mtn-5gb".to_string()),
                    network: Some("MTN".to_string()),
                    ported: false,
                },
                TxStatus::Paid,
            )
            .unwrap();
        store.find_by_ref(tx_ref).await.unwrap().unwrap()
    }

    fn service(store: Arc<MemoryStore>, vendor: Arc<CountingVendor>) -> DeliveryService {
        DeliveryService::new(store, vendor, Arc::new(StaticPlanCatalog::builtin()))
    }

    #[tokio::test]
    async fn winner_delivers_and_marks_fulfilled() {
        let store = Arc::new(MemoryStore::new());
        let tx = paid_tx(&store, "SAUKI-DEL-1").await;
        let vendor = vendor(delivered());

        let after = service(store.clone(), vendor.clone()).fulfil(&tx).await.unwrap();

        assert_eq!(after.status, TxStatus::Delivered);
        assert_eq!(after.delivery_state, DeliveryState::Fulfilled);
        assert_eq!(vendor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_call_is_a_pure_read() {
        let store = Arc::new(MemoryStore::new());
        let tx = paid_tx(&store, "SAUKI-DEL-2").await;
        let vendor = vendor(delivered());
        let service = service(store.clone(), vendor.clone());

        service.fulfil(&tx).await.unwrap();
        let again = service.fulfil(&tx).await.unwrap();

        assert_eq!(again.status, TxStatus::Delivered);
        assert_eq!(vendor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn vend_error_leaves_paid_with_failure_record() {
        let store = Arc::new(MemoryStore::new());
        let tx = paid_tx(&store, "SAUKI-DEL-3").await;
        let vendor = vendor(Err(VendError::Upstream {
            status: 400,
            body: "invalid plan".to_string(),
        }));

        let after = service(store.clone(), vendor).fulfil(&tx).await.unwrap();

        assert_eq!(after.status, TxStatus::Paid);
        assert_eq!(after.delivery_state, DeliveryState::Failed);
        let data = after.delivery_data.unwrap();
        assert_eq!(data["transient"], json!(false));
        assert_eq!(data["status_code"], json!(400));
    }

    #[tokio::test]
    async fn business_rejection_is_a_failed_delivery() {
        let store = Arc::new(MemoryStore::new());
        let tx = paid_tx(&store, "SAUKI-DEL-4").await;
        let vendor = vendor(Ok(VendResponse {
            success: false,
            status_code: 200,
            payload: json!({ "status": "failed", "message": "insufficient vendor wallet" }),
        }));

        let after = service(store.clone(), vendor).fulfil(&tx).await.unwrap();
        assert_eq!(after.delivery_state, DeliveryState::Failed);
        assert_eq!(after.delivery_data.unwrap()["error"], json!("vendor_rejected"));
    }

    #[tokio::test]
    async fn unpaid_transaction_is_not_claimed() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_transaction(
                NewTransaction {
                    tx_ref: "SAUKI-DEL-5".to_string(),
                    kind: TxKind::Data,
                    amount: BigDecimal::from(300),
                    phone: "08031234567".to_string(),
                    agent_id: None,
                    plan_id: Some("mtn-1gb".to_string()),
                    network: None,
                    ported: false,
                },
                TxStatus::Pending,
            )
            .unwrap();
        let tx = store.find_by_ref("SAUKI-DEL-5").await.unwrap().unwrap();
        let vendor = vendor(delivered());

        let after = service(store.clone(), vendor.clone()).fulfil(&tx).await.unwrap();
        assert_eq!(after.delivery_state, DeliveryState::Unclaimed);
        assert_eq!(vendor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn request_prefers_captured_network_then_plan() {
        let catalog = StaticPlanCatalog::builtin();
        let mut tx = Transaction {
            tx_ref: "T".to_string(),
            kind: TxKind::Data,
            status: TxStatus::Paid,
            amount: BigDecimal::from(300),
            phone: "08051234567".to_string(),
            agent_id: None,
            plan_id: Some("mtn-1gb".to_string()),
            network: Some("AIRTEL".to_string()),
            ported: true,
            gateway_response: None,
            delivery_state: DeliveryState::Unclaimed,
            delivery_data: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let request = vend_request_for(&tx, &catalog).unwrap();
        assert_eq!(request.network, Network::Airtel);
        assert_eq!(request.plan, "208");
        assert!(request.ported);

        // A Glo-looking number buying an MTN plan still vends on MTN.
        tx.network = None;
        assert_eq!(vend_request_for(&tx, &catalog).unwrap().network, Network::Mtn);

        tx.plan_id = Some("nope".to_string());
        assert!(vend_request_for(&tx, &catalog).is_err());
    }
}
