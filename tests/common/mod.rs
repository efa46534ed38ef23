#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sauki_backend::api::{AppState, Dependencies};
use sauki_backend::database::memory::MemoryStore;
use sauki_backend::database::models::{NewTransaction, TxKind};
use sauki_backend::health::HealthChecker;
use sauki_backend::payments::providers::{FlutterwaveConfig, FlutterwaveGateway};
use sauki_backend::services::catalog::StaticPlanCatalog;
use sauki_backend::services::rate_limiter::RateLimiter;
use sauki_backend::vending::{VendError, VendRequest, VendResponse, Vendor};

pub const WEBHOOK_SECRET: &str = "flw-webhook-hash-test";
pub const ADMIN_KEY: &str = "admin-key-0123456789";
pub const CUSTOMER_PHONE: &str = "08031234567";

/// Vendor double that counts calls and answers the same way every time
pub struct CountingVendor {
    calls: AtomicU32,
    delay: Duration,
    result: Result<VendResponse, VendError>,
}

impl CountingVendor {
    pub fn delivering() -> Arc<Self> {
        Self::with(Ok(VendResponse {
            success: true,
            status_code: 200,
            payload: json!({ "Status": "successful", "id": 991 }),
        }))
    }

    pub fn failing(error: VendError) -> Arc<Self> {
        Self::with(Err(error))
    }

    pub fn with(result: Result<VendResponse, VendError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(20),
            result,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Vendor for CountingVendor {
    async fn vend(&self, _request: &VendRequest) -> Result<VendResponse, VendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Long enough for concurrent callers to pile up on the claim.
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

pub fn flutterwave(base_url: &str) -> Arc<FlutterwaveGateway> {
    Arc::new(
        FlutterwaveGateway::new(FlutterwaveConfig {
            secret_key: "FLWSECK_TEST-demo".to_string(),
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .expect("gateway client"),
    )
}

pub fn checkout(tx_ref: &str, amount: i64, plan_id: &str) -> NewTransaction {
    NewTransaction {
        tx_ref: tx_ref.to_string(),
        kind: TxKind::Data,
        amount: BigDecimal::from(amount),
        phone: CUSTOMER_PHONE.to_string(),
        agent_id: None,
        plan_id: Some(plan_id.to_string()),
        network: None,
        ported: false,
    }
}

/// Full service graph over the in-memory store. The gateway points at
/// `gateway_url`, normally a mockito server.
pub fn app_state(
    store: Arc<MemoryStore>,
    vendor: Arc<dyn Vendor>,
    gateway_url: &str,
    cashback_rate: BigDecimal,
) -> AppState {
    AppState::new(Dependencies {
        transactions: store.clone(),
        ledger_store: store,
        gateway: flutterwave(gateway_url),
        vendor,
        catalog: Arc::new(StaticPlanCatalog::builtin()),
        rate_limiter: Arc::new(RateLimiter::in_memory()),
        health: HealthChecker::new(),
        cashback_rate,
        admin_api_key: ADMIN_KEY.to_string(),
    })
}

pub fn flutterwave_verify_body(tx_ref: &str, status: &str, amount: &str) -> String {
    json!({
        "status": "success",
        "message": "Transaction fetched successfully",
        "data": {
            "id": 4_812_377,
            "tx_ref": tx_ref,
            "flw_ref": "FLW-MOCK-7731",
            "amount": amount,
            "currency": "NGN",
            "status": status,
        }
    })
    .to_string()
}
