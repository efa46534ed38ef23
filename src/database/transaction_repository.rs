use crate::database::error::DatabaseError;
use crate::database::models::{DeliveryState, NewTransaction, Transaction, TxKind, TxStatus};
use crate::database::repository::TransactionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

pub(crate) const TX_COLUMNS: &str = "tx_ref, kind, status, amount, phone, agent_id, plan_id, \
     network, ported, gateway_response, delivery_state, delivery_data, created_at, updated_at";

/// Raw `transactions` row; enum columns are decoded in `TryFrom`.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct TransactionRow {
    pub tx_ref: String,
    pub kind: String,
    pub status: String,
    pub amount: BigDecimal,
    pub phone: String,
    pub agent_id: Option<Uuid>,
    pub plan_id: Option<String>,
    pub network: Option<String>,
    pub ported: bool,
    pub gateway_response: Option<JsonValue>,
    pub delivery_state: String,
    pub delivery_data: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = TxKind::from_str(&row.kind)
            .ok_or_else(|| DatabaseError::unknown(format!("invalid kind '{}'", row.kind)))?;
        let status = TxStatus::from_str(&row.status)
            .ok_or_else(|| DatabaseError::unknown(format!("invalid status '{}'", row.status)))?;
        let delivery_state = DeliveryState::from_str(&row.delivery_state).ok_or_else(|| {
            DatabaseError::unknown(format!("invalid delivery_state '{}'", row.delivery_state))
        })?;

        Ok(Transaction {
            tx_ref: row.tx_ref,
            kind,
            status,
            amount: row.amount,
            phone: row.phone,
            agent_id: row.agent_id,
            plan_id: row.plan_id,
            network: row.network,
            ported: row.ported,
            gateway_response: row.gateway_response,
            delivery_state,
            delivery_data: row.delivery_data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed transaction store
#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn execute_conditional(
        &self,
        sql: &str,
        tx_ref: &str,
        payload: Option<JsonValue>,
    ) -> Result<bool, DatabaseError> {
        let mut query = sqlx::query(sql).bind(tx_ref);
        if let Some(payload) = payload {
            query = query.bind(payload);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn insert(&self, tx: NewTransaction) -> Result<Transaction, DatabaseError> {
        let sql = format!(
            "INSERT INTO transactions
             (tx_ref, kind, status, amount, phone, agent_id, plan_id, network, ported, delivery_state)
             VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, 'unclaimed')
             RETURNING {}",
            TX_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(&tx.tx_ref)
            .bind(tx.kind.as_str())
            .bind(&tx.amount)
            .bind(&tx.phone)
            .bind(tx.agent_id)
            .bind(&tx.plan_id)
            .bind(&tx.network)
            .bind(tx.ported)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Transaction::try_from(row)
    }

    async fn find_by_ref(&self, tx_ref: &str) -> Result<Option<Transaction>, DatabaseError> {
        let sql = format!("SELECT {} FROM transactions WHERE tx_ref = $1", TX_COLUMNS);
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn mark_paid(
        &self,
        tx_ref: &str,
        gateway_response: JsonValue,
    ) -> Result<bool, DatabaseError> {
        self.execute_conditional(
            "UPDATE transactions
             SET status = 'paid', gateway_response = $2, updated_at = NOW()
             WHERE tx_ref = $1 AND status = 'pending'",
            tx_ref,
            Some(gateway_response),
        )
        .await
    }

    async fn mark_failed(
        &self,
        tx_ref: &str,
        from: TxStatus,
        reason: JsonValue,
    ) -> Result<bool, DatabaseError> {
        if !from.can_transition_to(TxStatus::Failed) {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE transactions
             SET status = 'failed', gateway_response = $3, updated_at = NOW()
             WHERE tx_ref = $1 AND status = $2",
        )
        .bind(tx_ref)
        .bind(from.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_claim(&self, tx_ref: &str, marker: JsonValue) -> Result<bool, DatabaseError> {
        self.execute_conditional(
            "UPDATE transactions
             SET delivery_state = 'claiming', delivery_data = $2, updated_at = NOW()
             WHERE tx_ref = $1 AND delivery_state = 'unclaimed'",
            tx_ref,
            Some(marker),
        )
        .await
    }

    async fn complete_delivery(
        &self,
        tx_ref: &str,
        result: JsonValue,
    ) -> Result<bool, DatabaseError> {
        self.execute_conditional(
            "UPDATE transactions
             SET delivery_state = 'fulfilled', delivery_data = $2,
                 status = 'delivered', updated_at = NOW()
             WHERE tx_ref = $1 AND delivery_state = 'claiming' AND status = 'paid'",
            tx_ref,
            Some(result),
        )
        .await
    }

    async fn fail_delivery(
        &self,
        tx_ref: &str,
        failure: JsonValue,
    ) -> Result<bool, DatabaseError> {
        self.execute_conditional(
            "UPDATE transactions
             SET delivery_state = 'failed', delivery_data = $2, updated_at = NOW()
             WHERE tx_ref = $1 AND delivery_state = 'claiming'",
            tx_ref,
            Some(failure),
        )
        .await
    }

    async fn reset_delivery(&self, tx_ref: &str) -> Result<bool, DatabaseError> {
        self.execute_conditional(
            "UPDATE transactions
             SET delivery_state = 'unclaimed', delivery_data = NULL, updated_at = NOW()
             WHERE tx_ref = $1 AND delivery_state = 'failed' AND status = 'paid'",
            tx_ref,
            None,
        )
        .await
    }

    async fn list_for_reconciliation(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE created_at >= $1
               AND agent_id IS NULL
               AND kind IN ('data', 'ecommerce')
               AND (status = 'pending' OR (status = 'paid' AND delivery_state = 'unclaimed'))
             ORDER BY created_at ASC
             LIMIT $2",
            TX_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn row(kind: &str, status: &str, state: &str) -> TransactionRow {
        TransactionRow {
            tx_ref: "SAUKI-COM-1".to_string(),
            kind: kind.to_string(),
            status: status.to_string(),
            amount: BigDecimal::from_str("500").unwrap(),
            phone: "08031234567".to_string(),
            agent_id: None,
            plan_id: Some("mtn-1gb".to_string()),
            network: Some("MTN".to_string()),
            ported: false,
            gateway_response: None,
            delivery_state: state.to_string(),
            delivery_data: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_valid_row() {
        let tx = Transaction::try_from(row("data", "paid", "unclaimed")).unwrap();
        assert_eq!(tx.kind, TxKind::Data);
        assert_eq!(tx.status, TxStatus::Paid);
        assert!(tx.awaits_fulfilment());
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(Transaction::try_from(row("data", "refunded", "unclaimed")).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrations applied
    async fn test_claim_is_exclusive() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        let repo = TransactionRepository::new(pool);
        let tx_ref = format!("TEST-{}", Uuid::new_v4().simple());

        repo.insert(NewTransaction {
            tx_ref: tx_ref.clone(),
            kind: TxKind::Data,
            amount: BigDecimal::from(500),
            phone: "08031234567".to_string(),
            agent_id: None,
            plan_id: Some("mtn-1gb".to_string()),
            network: Some("MTN".to_string()),
            ported: false,
        })
        .await
        .unwrap();

        assert!(repo.mark_paid(&tx_ref, serde_json::json!({})).await.unwrap());
        assert!(!repo.mark_paid(&tx_ref, serde_json::json!({})).await.unwrap());
        assert!(repo.try_claim(&tx_ref, serde_json::json!({"state": "claiming"})).await.unwrap());
        assert!(!repo.try_claim(&tx_ref, serde_json::json!({"state": "claiming"})).await.unwrap());
    }
}
