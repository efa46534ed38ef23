use crate::database::error::DatabaseError;
use crate::database::models::VendAttemptRecord;
use crate::database::repository::VendAuditSink;
use async_trait::async_trait;
use sqlx::PgPool;

/// Writes vending attempts to `vend_attempts`
#[derive(Clone)]
pub struct VendAttemptRepository {
    pool: PgPool,
}

impl VendAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VendAuditSink for VendAttemptRepository {
    async fn record_attempt(&self, record: &VendAttemptRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO vend_attempts
             (tx_ref, attempt, provider, duration_ms, status_code, outcome, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.tx_ref)
        .bind(record.attempt as i32)
        .bind(&record.provider)
        .bind(record.duration_ms as i64)
        .bind(record.status_code.map(i32::from))
        .bind(record.outcome.as_str())
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
