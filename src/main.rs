use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sauki_backend::api::{self, AppState, Dependencies};
use sauki_backend::config::{AppConfig, RateLimitBackend};
use sauki_backend::database::{
    self, ledger_repository::LedgerRepository, memory::MemoryStore,
    repository::{LedgerStore, TransactionStore, VendAuditSink},
    transaction_repository::TransactionRepository,
    vend_attempt_repository::VendAttemptRepository, PoolConfig,
};
use sauki_backend::health::HealthChecker;
use sauki_backend::logging::init_tracing;
use sauki_backend::payments::providers::{FlutterwaveConfig, FlutterwaveGateway};
use sauki_backend::services::catalog::StaticPlanCatalog;
use sauki_backend::services::rate_limiter::{MemoryRateLimitStore, RateLimitStore, RateLimiter};
use sauki_backend::vending::VendingClient;
use sauki_backend::workers::payment_monitor::{PaymentMonitorConfig, PaymentMonitorWorker};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

struct Stores {
    transactions: Arc<dyn TransactionStore>,
    ledger: Arc<dyn LedgerStore>,
    audit: Arc<dyn VendAuditSink>,
    pool: Option<sqlx::PgPool>,
}

async fn init_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if config.skip_externals {
        info!("Skipping database initialization (SKIP_EXTERNALS=true), using in-memory store");
        let store = Arc::new(MemoryStore::new());
        return Ok(Stores {
            transactions: store.clone(),
            ledger: store.clone(),
            audit: store,
            pool: None,
        });
    }

    info!("Initializing database connection pool...");
    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig::from(&config.database)),
    )
    .await?;
    if config.database.run_migrations {
        database::run_migrations(&pool).await?;
    }
    info!(
        max_connections = pool.options().get_max_connections(),
        "Database connection pool initialized"
    );

    Ok(Stores {
        transactions: Arc::new(TransactionRepository::new(pool.clone())),
        ledger: Arc::new(LedgerRepository::new(pool.clone())),
        audit: Arc::new(VendAttemptRepository::new(pool.clone())),
        pool: Some(pool),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        "Starting Sauki reconciliation service"
    );

    let stores = init_stores(&config).await?;
    let mut health = HealthChecker::new();
    if let Some(pool) = stores.pool.clone() {
        health = health.with_database(pool);
    }

    // Rate limit counters
    #[cfg(feature = "cache")]
    let mut cache_pool = None;
    let limiter_store: Arc<dyn RateLimitStore> = match config.rate_limit.backend {
        #[cfg(feature = "cache")]
        RateLimitBackend::Redis => {
            let pool = sauki_backend::cache::init_cache_pool(
                sauki_backend::cache::CachePoolConfig::from(&config.cache),
            )
            .await?;
            health = health.with_cache(pool.clone());
            cache_pool = Some(pool.clone());
            Arc::new(sauki_backend::cache::rate_limit::RedisRateLimitStore::new(pool))
        }
        #[cfg(not(feature = "cache"))]
        RateLimitBackend::Redis => {
            warn!(
                "Redis rate limiting requested without the cache feature, using in-memory counters"
            );
            Arc::new(MemoryRateLimitStore::new())
        }
        RateLimitBackend::Memory => {
            warn!("Rate limit counters are per-instance (in-memory backend)");
            Arc::new(MemoryRateLimitStore::new())
        }
    };
    let rate_limiter = Arc::new(RateLimiter::new(limiter_store, config.rate_limit.enabled));

    let gateway = Arc::new(FlutterwaveGateway::new(FlutterwaveConfig::from_app(
        &config.gateway,
        &config.security,
    ))?);
    let vendor = Arc::new(VendingClient::new(config.vending.clone(), stores.audit.clone())?);
    health = health.with_breaker(vendor.breaker());
    let catalog = Arc::new(StaticPlanCatalog::from_config(&config.wallet)?);
    info!(plans = catalog.len(), "Data plan catalog loaded");

    let state = AppState::new(Dependencies {
        transactions: stores.transactions.clone(),
        ledger_store: stores.ledger.clone(),
        gateway,
        vendor,
        catalog,
        rate_limiter,
        health,
        cashback_rate: config.wallet.cashback_rate.clone(),
        admin_api_key: config.security.admin_api_key.clone(),
    });

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let monitor_handle = if config.monitor.enabled {
        let worker = PaymentMonitorWorker::new(
            stores.transactions.clone(),
            state.verifier.clone(),
            PaymentMonitorConfig::from(&config.monitor),
        );
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Payment monitor worker disabled (PAYMENT_MONITOR_ENABLED=false)");
        None
    };

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = monitor_handle {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for payment monitor shutdown");
        }
    }

    #[cfg(feature = "cache")]
    if let Some(pool) = cache_pool {
        sauki_backend::cache::shutdown_cache_pool(&pool).await;
    }
    if let Some(pool) = stores.pool {
        pool.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}
