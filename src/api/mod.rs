//! HTTP surface: router assembly and shared handler state

pub mod admin;
pub mod agents;
pub mod health;
pub mod transactions;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::database::repository::{LedgerStore, TransactionStore};
use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::PaymentGateway;
use crate::services::admin::AdminService;
use crate::services::agents::AgentService;
use crate::services::catalog::PlanCatalog;
use crate::services::rate_limiter::RateLimiter;
use crate::services::{DeliveryService, PaymentVerifier, WalletLedger, WebhookProcessor};
use crate::vending::Vendor;

/// Everything the services are built from
pub struct Dependencies {
    pub transactions: Arc<dyn TransactionStore>,
    pub ledger_store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub vendor: Arc<dyn Vendor>,
    pub catalog: Arc<dyn PlanCatalog>,
    pub rate_limiter: Arc<RateLimiter>,
    pub health: HealthChecker,
    pub cashback_rate: BigDecimal,
    pub admin_api_key: String,
}

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<PaymentVerifier>,
    pub webhooks: Arc<WebhookProcessor>,
    pub ledger: Arc<WalletLedger>,
    pub agents: Arc<AgentService>,
    pub admin: Arc<AdminService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub health: HealthChecker,
    pub admin_api_key: Arc<str>,
}

impl AppState {
    pub fn new(deps: Dependencies) -> Self {
        let delivery = Arc::new(DeliveryService::new(
            deps.transactions.clone(),
            deps.vendor.clone(),
            deps.catalog.clone(),
        ));
        let ledger = Arc::new(WalletLedger::new(
            deps.ledger_store.clone(),
            deps.transactions.clone(),
            deps.vendor,
            deps.catalog,
            deps.cashback_rate,
        ));
        let verifier = Arc::new(PaymentVerifier::new(
            deps.transactions.clone(),
            deps.gateway.clone(),
            delivery.clone(),
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            deps.gateway,
            deps.transactions.clone(),
            delivery,
            ledger.clone(),
        ));

        Self {
            verifier,
            webhooks,
            agents: Arc::new(AgentService::new(deps.ledger_store)),
            admin: Arc::new(AdminService::new(deps.transactions, ledger.clone())),
            ledger,
            rate_limiter: deps.rate_limiter,
            health: deps.health,
            admin_api_key: Arc::from(deps.admin_api_key),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .route(
            "/api/transactions/{tx_ref}/verify",
            get(transactions::verify_transaction),
        )
        .route("/webhooks/flutterwave", post(webhooks::handle_flutterwave))
        .route("/api/agents/register", post(agents::register))
        .route("/api/agents/login", post(agents::login))
        .route("/api/agents/{agent_id}/purchase", post(agents::purchase))
        .route(
            "/api/agents/{agent_id}/cashback/redeem",
            post(agents::redeem_cashback),
        )
        .route(
            "/api/admin/transactions/{tx_ref}/reset-delivery",
            post(admin::reset_delivery),
        )
        .route("/api/admin/agents/{agent_id}/adjust", post(admin::adjust_balance))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
