//! Storage seams. Every state change is a conditional write: a method
//! returning `bool` reports whether its WHERE clause matched, and `false`
//! means another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::error::DatabaseError;
use super::models::{
    Agent, BalanceAdjustment, CashbackEntry, CashbackRedemption, FundingCredit, LedgerOutcome,
    NewAgent, NewTransaction, PurchaseSettlement, Transaction, TxStatus, VendAttemptRecord,
};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new `pending`, `unclaimed` transaction. A reused `tx_ref`
    /// fails with a unique violation.
    async fn insert(&self, tx: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn find_by_ref(&self, tx_ref: &str) -> Result<Option<Transaction>, DatabaseError>;

    /// `pending -> paid`, storing the gateway payload.
    async fn mark_paid(
        &self,
        tx_ref: &str,
        gateway_response: JsonValue,
    ) -> Result<bool, DatabaseError>;

    /// `from -> failed`, recording the reason in the gateway payload.
    async fn mark_failed(
        &self,
        tx_ref: &str,
        from: TxStatus,
        reason: JsonValue,
    ) -> Result<bool, DatabaseError>;

    /// `unclaimed -> claiming`. Exactly one concurrent caller gets `true`.
    async fn try_claim(&self, tx_ref: &str, marker: JsonValue) -> Result<bool, DatabaseError>;

    /// `claiming -> fulfilled` together with `paid -> delivered`.
    async fn complete_delivery(
        &self,
        tx_ref: &str,
        result: JsonValue,
    ) -> Result<bool, DatabaseError>;

    /// `claiming -> failed`; the payment status is left alone.
    async fn fail_delivery(&self, tx_ref: &str, failure: JsonValue)
        -> Result<bool, DatabaseError>;

    /// `failed -> unclaimed` while the transaction is still `paid`.
    async fn reset_delivery(&self, tx_ref: &str) -> Result<bool, DatabaseError>;

    /// Gateway-settled transactions created after `since` that are still
    /// `pending`, or `paid` with an unclaimed delivery.
    async fn list_for_reconciliation(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<Agent>, DatabaseError>;

    async fn find_agent_by_phone(&self, phone: &str) -> Result<Option<Agent>, DatabaseError>;

    async fn find_agent_by_account(
        &self,
        account_number: &str,
    ) -> Result<Option<Agent>, DatabaseError>;

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent, DatabaseError>;

    /// Debit the agent, deliver the transaction and accrue cashback as one
    /// unit. If the debit cannot be covered the transaction is marked
    /// `failed` for reconciliation and `InsufficientFunds` is returned.
    async fn settle_purchase(
        &self,
        settlement: &PurchaseSettlement,
    ) -> Result<LedgerOutcome, DatabaseError>;

    /// Mark a claimed agent purchase failed without touching balances.
    async fn fail_purchase(&self, tx_ref: &str, failure: JsonValue)
        -> Result<bool, DatabaseError>;

    /// Record the funding transaction and credit the agent, once per
    /// gateway reference.
    async fn credit_funding(&self, credit: &FundingCredit) -> Result<LedgerOutcome, DatabaseError>;

    async fn redeem_cashback(
        &self,
        redemption: &CashbackRedemption,
    ) -> Result<LedgerOutcome, DatabaseError>;

    async fn adjust_balance(
        &self,
        adjustment: &BalanceAdjustment,
    ) -> Result<LedgerOutcome, DatabaseError>;

    async fn cashback_entries(&self, agent_id: Uuid) -> Result<Vec<CashbackEntry>, DatabaseError>;
}

/// Append-only audit of vending attempts
#[async_trait]
pub trait VendAuditSink: Send + Sync {
    async fn record_attempt(&self, record: &VendAttemptRecord) -> Result<(), DatabaseError>;
}
