use crate::database::error::DatabaseError;
use crate::database::models::{
    AdjustmentDirection, Agent, BalanceAdjustment, BalanceSnapshot, CashbackDirection,
    CashbackEntry, CashbackRedemption, FundingCredit, LedgerOutcome, NewAgent, PurchaseSettlement,
    TxKind,
};
use crate::database::repository::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

const AGENT_COLUMNS: &str = "id, phone, name, account_number, balance, cashback_balance, \
     is_active, pin_hash, created_at, updated_at";

#[derive(Debug, FromRow)]
struct BalanceRow {
    balance: BigDecimal,
    cashback_balance: BigDecimal,
}

#[derive(Debug, FromRow)]
struct CashbackRow {
    id: Uuid,
    agent_id: Uuid,
    direction: String,
    amount: BigDecimal,
    tx_ref: String,
    created_at: DateTime<Utc>,
}

/// Postgres-backed wallet ledger. Each mutation runs inside one database
/// transaction; an early return drops it, which rolls back.
#[derive(Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_agent_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Agent>, DatabaseError> {
        let sql = format!("SELECT {} FROM agents WHERE {} = $1", AGENT_COLUMNS, column);
        sqlx::query_as::<_, Agent>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

async fn insert_ledger_tx(
    conn: &mut sqlx::PgConnection,
    tx_ref: &str,
    kind: TxKind,
    amount: &BigDecimal,
    phone: &str,
    agent_id: Uuid,
    delivery_data: JsonValue,
) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        "INSERT INTO transactions
         (tx_ref, kind, status, amount, phone, agent_id, delivery_state, delivery_data)
         VALUES ($1, $2, 'delivered', $3, $4, $5, 'fulfilled', $6)
         ON CONFLICT (tx_ref) DO NOTHING",
    )
    .bind(tx_ref)
    .bind(kind.as_str())
    .bind(amount)
    .bind(phone)
    .bind(agent_id)
    .bind(delivery_data)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(result.rows_affected())
}

async fn insert_cashback_entry(
    conn: &mut sqlx::PgConnection,
    agent_id: Uuid,
    direction: CashbackDirection,
    amount: &BigDecimal,
    tx_ref: &str,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "INSERT INTO cashback_entries (id, agent_id, direction, amount, tx_ref)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(agent_id)
    .bind(direction.as_str())
    .bind(amount)
    .bind(tx_ref)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

async fn current_balances(
    conn: &mut sqlx::PgConnection,
    agent_id: Uuid,
) -> Result<BalanceRow, DatabaseError> {
    sqlx::query_as::<_, BalanceRow>("SELECT balance, cashback_balance FROM agents WHERE id = $1")
        .bind(agent_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)
}

fn snapshot(agent_id: Uuid, row: BalanceRow) -> LedgerOutcome {
    LedgerOutcome::Applied(BalanceSnapshot {
        agent_id,
        balance: row.balance,
        cashback_balance: row.cashback_balance,
    })
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<Agent>, DatabaseError> {
        let sql = format!("SELECT {} FROM agents WHERE id = $1", AGENT_COLUMNS);
        sqlx::query_as::<_, Agent>(&sql)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_agent_by_phone(&self, phone: &str) -> Result<Option<Agent>, DatabaseError> {
        self.find_agent_where("phone", phone).await
    }

    async fn find_agent_by_account(
        &self,
        account_number: &str,
    ) -> Result<Option<Agent>, DatabaseError> {
        self.find_agent_where("account_number", account_number).await
    }

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent, DatabaseError> {
        let sql = format!(
            "INSERT INTO agents (id, phone, name, account_number, pin_hash)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            AGENT_COLUMNS
        );
        sqlx::query_as::<_, Agent>(&sql)
            .bind(Uuid::new_v4())
            .bind(&agent.phone)
            .bind(&agent.name)
            .bind(&agent.account_number)
            .bind(&agent.pin_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn settle_purchase(
        &self,
        settlement: &PurchaseSettlement,
    ) -> Result<LedgerOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let debited = sqlx::query_as::<_, BalanceRow>(
            "UPDATE agents
             SET balance = balance - $2, cashback_balance = cashback_balance + $3,
                 updated_at = NOW()
             WHERE id = $1 AND balance >= $2
             RETURNING balance, cashback_balance",
        )
        .bind(settlement.agent_id)
        .bind(&settlement.amount)
        .bind(&settlement.cashback)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(balances) = debited else {
            // Vended but the balance moved underneath us; leave a record for
            // manual reconciliation instead of going negative.
            let available = current_balances(&mut *tx, settlement.agent_id).await?.balance;
            sqlx::query(
                "UPDATE transactions
                 SET status = 'failed', delivery_state = 'fulfilled', delivery_data = $2,
                     updated_at = NOW()
                 WHERE tx_ref = $1 AND status = 'pending'",
            )
            .bind(&settlement.tx_ref)
            .bind(json!({
                "result": settlement.delivery_result,
                "reason": "insufficient_balance_at_settlement",
            }))
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            tx.commit().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(LedgerOutcome::InsufficientFunds { available });
        };

        let delivered = sqlx::query(
            "UPDATE transactions
             SET status = 'delivered', delivery_state = 'fulfilled', delivery_data = $2,
                 updated_at = NOW()
             WHERE tx_ref = $1 AND status = 'pending' AND delivery_state = 'claiming'",
        )
        .bind(&settlement.tx_ref)
        .bind(&settlement.delivery_result)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if delivered.rows_affected() != 1 {
            warn!(
                tx_ref = %settlement.tx_ref,
                "Purchase no longer claimable, rolling back settlement"
            );
            return Ok(LedgerOutcome::Duplicate);
        }

        if settlement.cashback > BigDecimal::from(0) {
            insert_cashback_entry(
                &mut *tx,
                settlement.agent_id,
                CashbackDirection::Earned,
                &settlement.cashback,
                &settlement.tx_ref,
            )
            .await?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(snapshot(settlement.agent_id, balances))
    }

    async fn fail_purchase(
        &self,
        tx_ref: &str,
        failure: JsonValue,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE transactions
             SET status = 'failed', delivery_state = 'failed', delivery_data = $2,
                 updated_at = NOW()
             WHERE tx_ref = $1 AND status = 'pending' AND delivery_state = 'claiming'",
        )
        .bind(tx_ref)
        .bind(failure)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn credit_funding(&self, credit: &FundingCredit) -> Result<LedgerOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let inserted = insert_ledger_tx(
            &mut *tx,
            &credit.gateway_ref,
            TxKind::WalletFunding,
            &credit.amount,
            &credit.phone,
            credit.agent_id,
            json!({ "credited": credit.amount.to_string(), "gateway": credit.payload }),
        )
        .await?;

        if inserted == 0 {
            return Ok(LedgerOutcome::Duplicate);
        }

        let balances = sqlx::query_as::<_, BalanceRow>(
            "UPDATE agents SET balance = balance + $2, updated_at = NOW()
             WHERE id = $1
             RETURNING balance, cashback_balance",
        )
        .bind(credit.agent_id)
        .bind(&credit.amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(snapshot(credit.agent_id, balances))
    }

    async fn redeem_cashback(
        &self,
        redemption: &CashbackRedemption,
    ) -> Result<LedgerOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let moved = sqlx::query_as::<_, BalanceRow>(
            "UPDATE agents
             SET cashback_balance = cashback_balance - $2, balance = balance + $2,
                 updated_at = NOW()
             WHERE id = $1 AND cashback_balance >= $2
             RETURNING balance, cashback_balance",
        )
        .bind(redemption.agent_id)
        .bind(&redemption.amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(balances) = moved else {
            let available = current_balances(&mut *tx, redemption.agent_id)
                .await?
                .cashback_balance;
            return Ok(LedgerOutcome::InsufficientFunds { available });
        };

        insert_ledger_tx(
            &mut *tx,
            &redemption.tx_ref,
            TxKind::CashbackRedemption,
            &redemption.amount,
            &redemption.phone,
            redemption.agent_id,
            json!({ "redeemed": redemption.amount.to_string() }),
        )
        .await?;
        insert_cashback_entry(
            &mut *tx,
            redemption.agent_id,
            CashbackDirection::Redeemed,
            &redemption.amount,
            &redemption.tx_ref,
        )
        .await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(snapshot(redemption.agent_id, balances))
    }

    async fn adjust_balance(
        &self,
        adjustment: &BalanceAdjustment,
    ) -> Result<LedgerOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let sql = match adjustment.direction {
            AdjustmentDirection::Credit => {
                "UPDATE agents SET balance = balance + $2, updated_at = NOW()
                 WHERE id = $1
                 RETURNING balance, cashback_balance"
            }
            AdjustmentDirection::Debit => {
                "UPDATE agents SET balance = balance - $2, updated_at = NOW()
                 WHERE id = $1 AND balance >= $2
                 RETURNING balance, cashback_balance"
            }
        };

        let adjusted = sqlx::query_as::<_, BalanceRow>(sql)
            .bind(adjustment.agent_id)
            .bind(&adjustment.amount)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let Some(balances) = adjusted else {
            let available = current_balances(&mut *tx, adjustment.agent_id).await?.balance;
            return Ok(LedgerOutcome::InsufficientFunds { available });
        };

        insert_ledger_tx(
            &mut *tx,
            &adjustment.tx_ref,
            TxKind::AdminAdjustment,
            &adjustment.amount,
            &adjustment.phone,
            adjustment.agent_id,
            json!({
                "direction": adjustment.direction.as_str(),
                "reason": adjustment.reason,
            }),
        )
        .await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(snapshot(adjustment.agent_id, balances))
    }

    async fn cashback_entries(&self, agent_id: Uuid) -> Result<Vec<CashbackEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, CashbackRow>(
            "SELECT id, agent_id, direction, amount, tx_ref, created_at
             FROM cashback_entries WHERE agent_id = $1 ORDER BY created_at ASC",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter()
            .map(|row| {
                let direction = match row.direction.as_str() {
                    "earned" => CashbackDirection::Earned,
                    "redeemed" => CashbackDirection::Redeemed,
                    other => {
                        return Err(DatabaseError::unknown(format!(
                            "invalid cashback direction '{}'",
                            other
                        )))
                    }
                };
                Ok(CashbackEntry {
                    id: row.id,
                    agent_id: row.agent_id,
                    direction,
                    amount: row.amount,
                    tx_ref: row.tx_ref,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}
