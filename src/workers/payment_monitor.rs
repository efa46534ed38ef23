use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::database::models::TxStatus;
use crate::database::repository::TransactionStore;
use crate::services::PaymentVerifier;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PaymentMonitorConfig {
    /// How often the worker wakes up to reconcile.
    pub poll_interval: Duration,
    /// Only transactions created within this window are considered.
    pub lookback: Duration,
    /// Maximum number of transactions advanced per cycle.
    pub batch_size: i64,
}

impl Default for PaymentMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            lookback: Duration::from_secs(24 * 3600),
            batch_size: 50,
        }
    }
}

impl From<&MonitorConfig> for PaymentMonitorConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: config.interval,
            lookback: config.lookback,
            batch_size: config.batch_size,
        }
    }
}

/// What one reconciliation pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub paid: usize,
    pub delivered: usize,
    pub failed: usize,
    pub errors: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Catches payments whose client stopped polling and whose webhook never
/// arrived. Uses the same verifier as the HTTP path, so it is safe to run
/// alongside it on any number of replicas.
pub struct PaymentMonitorWorker {
    transactions: Arc<dyn TransactionStore>,
    verifier: Arc<PaymentVerifier>,
    config: PaymentMonitorConfig,
}

impl PaymentMonitorWorker {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        verifier: Arc<PaymentVerifier>,
        config: PaymentMonitorConfig,
    ) -> Self {
        Self {
            transactions,
            verifier,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            lookback_secs = self.config.lookback.as_secs(),
            batch_size = self.config.batch_size,
            "payment monitor worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment monitor worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.scanned > 0 => info!(
                            scanned = report.scanned,
                            paid = report.paid,
                            delivered = report.delivered,
                            failed = report.failed,
                            errors = report.errors,
                            "payment monitor cycle complete"
                        ),
                        Ok(_) => debug!("payment monitor cycle found nothing to do"),
                        Err(e) => warn!(error = %e, "payment monitor cycle failed"),
                    }
                }
            }
        }

        info!("payment monitor worker stopped");
    }

    /// One pass over the reconciliation window. A failure on one transaction
    /// is logged and does not stop the rest.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let lookback = chrono::Duration::from_std(self.config.lookback)?;
        let since = Utc::now() - lookback;
        let candidates = self
            .transactions
            .list_for_reconciliation(since, self.config.batch_size)
            .await?;

        let mut report = CycleReport {
            scanned: candidates.len(),
            ..CycleReport::default()
        };

        for tx in candidates {
            let tx_ref = tx.tx_ref.clone();
            let before = tx.status;
            match self.verifier.advance(tx).await {
                Ok(after) => match after.status {
                    TxStatus::Delivered => report.delivered += 1,
                    TxStatus::Paid if before == TxStatus::Pending => report.paid += 1,
                    TxStatus::Failed => report.failed += 1,
                    _ => {}
                },
                Err(e) => {
                    report.errors += 1;
                    warn!(tx_ref = %tx_ref, error = %e, "failed to reconcile transaction");
                }
            }
        }

        Ok(report)
    }
}
