//! In-process store for tests and `SKIP_EXTERNALS` runs.
//!
//! One mutex plays the part of the database engine: each trait method holds
//! it for the whole read-check-write, which gives the same row atomicity the
//! conditional SQL updates rely on. Business code never sees the lock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::error::{DatabaseError, DatabaseErrorKind};
use super::models::{
    AdjustmentDirection, Agent, BalanceAdjustment, BalanceSnapshot, CashbackDirection,
    CashbackEntry, CashbackRedemption, DeliveryState, FundingCredit, LedgerOutcome, NewAgent,
    NewTransaction, PurchaseSettlement, Transaction, TxKind, TxStatus, VendAttemptRecord,
};
use super::repository::{LedgerStore, TransactionStore, VendAuditSink};

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<String, Transaction>,
    agents: HashMap<Uuid, Agent>,
    cashback: Vec<CashbackEntry>,
    vend_attempts: Vec<VendAttemptRecord>,
}

impl MemoryState {
    fn agent_mut(&mut self, agent_id: Uuid) -> Result<&mut Agent, DatabaseError> {
        self.agents
            .get_mut(&agent_id)
            .ok_or_else(|| DatabaseError::new(DatabaseErrorKind::NotFound))
    }

    fn snapshot(&self, agent_id: Uuid) -> Result<BalanceSnapshot, DatabaseError> {
        let agent = self
            .agents
            .get(&agent_id)
            .ok_or_else(|| DatabaseError::new(DatabaseErrorKind::NotFound))?;
        Ok(BalanceSnapshot {
            agent_id,
            balance: agent.balance.clone(),
            cashback_balance: agent.cashback_balance.clone(),
        })
    }

    /// Insert a settled ledger transaction unless the reference exists.
    fn insert_ledger_tx(
        &mut self,
        tx_ref: &str,
        kind: TxKind,
        amount: &BigDecimal,
        phone: &str,
        agent_id: Uuid,
        delivery_data: JsonValue,
    ) -> bool {
        if self.transactions.contains_key(tx_ref) {
            return false;
        }
        let now = Utc::now();
        self.transactions.insert(
            tx_ref.to_string(),
            Transaction {
                tx_ref: tx_ref.to_string(),
                kind,
                status: TxStatus::Delivered,
                amount: amount.clone(),
                phone: phone.to_string(),
                agent_id: Some(agent_id),
                plan_id: None,
                network: None,
                ported: false,
                gateway_response: None,
                delivery_state: DeliveryState::Fulfilled,
                delivery_data: Some(delivery_data),
                created_at: now,
                updated_at: now,
            },
        );
        true
    }

    fn push_cashback(
        &mut self,
        agent_id: Uuid,
        direction: CashbackDirection,
        amount: &BigDecimal,
        tx_ref: &str,
    ) {
        self.cashback.push(CashbackEntry {
            id: Uuid::new_v4(),
            agent_id,
            direction,
            amount: amount.clone(),
            tx_ref: tx_ref.to_string(),
            created_at: Utc::now(),
        });
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, DatabaseError> {
        self.state
            .lock()
            .map_err(|_| DatabaseError::unknown("memory store lock poisoned"))
    }

    /// Apply a conditional update to one transaction. Returns whether the
    /// predicate matched.
    fn update_where<P, F>(
        &self,
        tx_ref: &str,
        predicate: P,
        apply: F,
    ) -> Result<bool, DatabaseError>
    where
        P: FnOnce(&Transaction) -> bool,
        F: FnOnce(&mut Transaction),
    {
        let mut state = self.state()?;
        match state.transactions.get_mut(tx_ref) {
            Some(tx) if predicate(tx) => {
                apply(tx);
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn vend_attempts(&self) -> Vec<VendAttemptRecord> {
        self.state()
            .map(|s| s.vend_attempts.clone())
            .unwrap_or_default()
    }

    pub fn vend_attempts_for(&self, tx_ref: &str) -> Vec<VendAttemptRecord> {
        self.vend_attempts()
            .into_iter()
            .filter(|r| r.tx_ref == tx_ref)
            .collect()
    }

    /// Seed a transaction with an arbitrary status, as an external checkout
    /// flow would have left it.
    pub fn seed_transaction(
        &self,
        tx: NewTransaction,
        status: TxStatus,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state()?;
        let now = Utc::now();
        state.transactions.insert(
            tx.tx_ref.clone(),
            Transaction {
                tx_ref: tx.tx_ref,
                kind: tx.kind,
                status,
                amount: tx.amount,
                phone: tx.phone,
                agent_id: tx.agent_id,
                plan_id: tx.plan_id,
                network: tx.network,
                ported: tx.ported,
                gateway_response: None,
                delivery_state: DeliveryState::Unclaimed,
                delivery_data: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    pub fn set_agent_active(&self, agent_id: Uuid, active: bool) -> Result<(), DatabaseError> {
        let mut state = self.state()?;
        state.agent_mut(agent_id)?.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, tx: NewTransaction) -> Result<Transaction, DatabaseError> {
        let mut state = self.state()?;
        if state.transactions.contains_key(&tx.tx_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "transactions_pkey".to_string(),
            }));
        }
        let now = Utc::now();
        let record = Transaction {
            tx_ref: tx.tx_ref.clone(),
            kind: tx.kind,
            status: TxStatus::Pending,
            amount: tx.amount,
            phone: tx.phone,
            agent_id: tx.agent_id,
            plan_id: tx.plan_id,
            network: tx.network,
            ported: tx.ported,
            gateway_response: None,
            delivery_state: DeliveryState::Unclaimed,
            delivery_data: None,
            created_at: now,
            updated_at: now,
        };
        state.transactions.insert(tx.tx_ref, record.clone());
        Ok(record)
    }

    async fn find_by_ref(&self, tx_ref: &str) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self.state()?.transactions.get(tx_ref).cloned())
    }

    async fn mark_paid(
        &self,
        tx_ref: &str,
        gateway_response: JsonValue,
    ) -> Result<bool, DatabaseError> {
        self.update_where(
            tx_ref,
            |tx| tx.status == TxStatus::Pending,
            |tx| {
                tx.status = TxStatus::Paid;
                tx.gateway_response = Some(gateway_response);
            },
        )
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
        self.update_where(
            tx_ref,
            |tx| tx.status == from,
            |tx| {
                tx.status = TxStatus::Failed;
                tx.gateway_response = Some(reason);
            },
        )
    }

    async fn try_claim(&self, tx_ref: &str, marker: JsonValue) -> Result<bool, DatabaseError> {
        self.update_where(
            tx_ref,
            |tx| tx.delivery_state == DeliveryState::Unclaimed,
            |tx| {
                tx.delivery_state = DeliveryState::Claiming;
                tx.delivery_data = Some(marker);
            },
        )
    }

    async fn complete_delivery(
        &self,
        tx_ref: &str,
        result: JsonValue,
    ) -> Result<bool, DatabaseError> {
        self.update_where(
            tx_ref,
            |tx| tx.delivery_state == DeliveryState::Claiming && tx.status == TxStatus::Paid,
            |tx| {
                tx.delivery_state = DeliveryState::Fulfilled;
                tx.delivery_data = Some(result);
                tx.status = TxStatus::Delivered;
            },
        )
    }

    async fn fail_delivery(
        &self,
        tx_ref: &str,
        failure: JsonValue,
    ) -> Result<bool, DatabaseError> {
        self.update_where(
            tx_ref,
            |tx| tx.delivery_state == DeliveryState::Claiming,
            |tx| {
                tx.delivery_state = DeliveryState::Failed;
                tx.delivery_data = Some(failure);
            },
        )
    }

    async fn reset_delivery(&self, tx_ref: &str) -> Result<bool, DatabaseError> {
        self.update_where(
            tx_ref,
            |tx| tx.delivery_state == DeliveryState::Failed && tx.status == TxStatus::Paid,
            |tx| {
                tx.delivery_state = DeliveryState::Unclaimed;
                tx.delivery_data = None;
            },
        )
    }

    async fn list_for_reconciliation(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let state = self.state()?;
        let mut due: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.created_at >= since && tx.agent_id.is_none())
            .filter(|tx| matches!(tx.kind, TxKind::Data | TxKind::Ecommerce))
            .filter(|tx| {
                tx.status == TxStatus::Pending
                    || (tx.status == TxStatus::Paid
                        && tx.delivery_state == DeliveryState::Unclaimed)
            })
            .cloned()
            .collect();
        due.sort_by_key(|tx| tx.created_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<Agent>, DatabaseError> {
        Ok(self.state()?.agents.get(&agent_id).cloned())
    }

    async fn find_agent_by_phone(&self, phone: &str) -> Result<Option<Agent>, DatabaseError> {
        Ok(self
            .state()?
            .agents
            .values()
            .find(|a| a.phone == phone)
            .cloned())
    }

    async fn find_agent_by_account(
        &self,
        account_number: &str,
    ) -> Result<Option<Agent>, DatabaseError> {
        Ok(self
            .state()?
            .agents
            .values()
            .find(|a| a.account_number.as_deref() == Some(account_number))
            .cloned())
    }

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent, DatabaseError> {
        let mut state = self.state()?;
        let clash = state.agents.values().any(|a| {
            a.phone == agent.phone
                || (agent.account_number.is_some() && a.account_number == agent.account_number)
        });
        if clash {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "agents_phone_key".to_string(),
            }));
        }
        let now = Utc::now();
        let record = Agent {
            id: Uuid::new_v4(),
            phone: agent.phone,
            name: agent.name,
            account_number: agent.account_number,
            balance: BigDecimal::from(0),
            cashback_balance: BigDecimal::from(0),
            is_active: true,
            pin_hash: agent.pin_hash,
            created_at: now,
            updated_at: now,
        };
        state.agents.insert(record.id, record.clone());
        Ok(record)
    }

    async fn settle_purchase(
        &self,
        settlement: &PurchaseSettlement,
    ) -> Result<LedgerOutcome, DatabaseError> {
        let mut state = self.state()?;
        let available = state.agent_mut(settlement.agent_id)?.balance.clone();

        if available < settlement.amount {
            if let Some(tx) = state.transactions.get_mut(&settlement.tx_ref) {
                if tx.status == TxStatus::Pending {
                    tx.status = TxStatus::Failed;
                    tx.delivery_state = DeliveryState::Fulfilled;
                    tx.delivery_data = Some(json!({
                        "result": settlement.delivery_result,
                        "reason": "insufficient_balance_at_settlement",
                    }));
                    tx.updated_at = Utc::now();
                }
            }
            return Ok(LedgerOutcome::InsufficientFunds { available });
        }

        let claimable = state
            .transactions
            .get(&settlement.tx_ref)
            .map(|tx| {
                tx.status == TxStatus::Pending && tx.delivery_state == DeliveryState::Claiming
            })
            .unwrap_or(false);
        if !claimable {
            return Ok(LedgerOutcome::Duplicate);
        }

        let agent = state.agent_mut(settlement.agent_id)?;
        agent.balance = &agent.balance - &settlement.amount;
        agent.cashback_balance = &agent.cashback_balance + &settlement.cashback;
        agent.updated_at = Utc::now();

        if let Some(tx) = state.transactions.get_mut(&settlement.tx_ref) {
            tx.status = TxStatus::Delivered;
            tx.delivery_state = DeliveryState::Fulfilled;
            tx.delivery_data = Some(settlement.delivery_result.clone());
            tx.updated_at = Utc::now();
        }

        if settlement.cashback > BigDecimal::from(0) {
            state.push_cashback(
                settlement.agent_id,
                CashbackDirection::Earned,
                &settlement.cashback,
                &settlement.tx_ref,
            );
        }

        Ok(LedgerOutcome::Applied(state.snapshot(settlement.agent_id)?))
    }

    async fn fail_purchase(
        &self,
        tx_ref: &str,
        failure: JsonValue,
    ) -> Result<bool, DatabaseError> {
        self.update_where(
            tx_ref,
            |tx| tx.status == TxStatus::Pending && tx.delivery_state == DeliveryState::Claiming,
            |tx| {
                tx.status = TxStatus::Failed;
                tx.delivery_state = DeliveryState::Failed;
                tx.delivery_data = Some(failure);
            },
        )
    }

    async fn credit_funding(&self, credit: &FundingCredit) -> Result<LedgerOutcome, DatabaseError> {
        let mut state = self.state()?;
        // Resolve the agent before inserting so a failure leaves nothing behind.
        state.agent_mut(credit.agent_id)?;

        let inserted = state.insert_ledger_tx(
            &credit.gateway_ref,
            TxKind::WalletFunding,
            &credit.amount,
            &credit.phone,
            credit.agent_id,
            json!({ "credited": credit.amount.to_string(), "gateway": credit.payload }),
        );
        if !inserted {
            return Ok(LedgerOutcome::Duplicate);
        }

        let agent = state.agent_mut(credit.agent_id)?;
        agent.balance = &agent.balance + &credit.amount;
        agent.updated_at = Utc::now();
        Ok(LedgerOutcome::Applied(state.snapshot(credit.agent_id)?))
    }

    async fn redeem_cashback(
        &self,
        redemption: &CashbackRedemption,
    ) -> Result<LedgerOutcome, DatabaseError> {
        let mut state = self.state()?;
        let agent = state.agent_mut(redemption.agent_id)?;
        if agent.cashback_balance < redemption.amount {
            return Ok(LedgerOutcome::InsufficientFunds {
                available: agent.cashback_balance.clone(),
            });
        }
        if state.transactions.contains_key(&redemption.tx_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "transactions_pkey".to_string(),
            }));
        }

        let agent = state.agent_mut(redemption.agent_id)?;
        agent.cashback_balance = &agent.cashback_balance - &redemption.amount;
        agent.balance = &agent.balance + &redemption.amount;
        agent.updated_at = Utc::now();

        state.insert_ledger_tx(
            &redemption.tx_ref,
            TxKind::CashbackRedemption,
            &redemption.amount,
            &redemption.phone,
            redemption.agent_id,
            json!({ "redeemed": redemption.amount.to_string() }),
        );
        state.push_cashback(
            redemption.agent_id,
            CashbackDirection::Redeemed,
            &redemption.amount,
            &redemption.tx_ref,
        );
        Ok(LedgerOutcome::Applied(state.snapshot(redemption.agent_id)?))
    }

    async fn adjust_balance(
        &self,
        adjustment: &BalanceAdjustment,
    ) -> Result<LedgerOutcome, DatabaseError> {
        let mut state = self.state()?;
        let agent = state.agent_mut(adjustment.agent_id)?;
        if adjustment.direction == AdjustmentDirection::Debit && agent.balance < adjustment.amount {
            return Ok(LedgerOutcome::InsufficientFunds {
                available: agent.balance.clone(),
            });
        }
        if state.transactions.contains_key(&adjustment.tx_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "transactions_pkey".to_string(),
            }));
        }

        let agent = state.agent_mut(adjustment.agent_id)?;
        agent.balance = match adjustment.direction {
            AdjustmentDirection::Credit => &agent.balance + &adjustment.amount,
            AdjustmentDirection::Debit => &agent.balance - &adjustment.amount,
        };
        agent.updated_at = Utc::now();

        state.insert_ledger_tx(
            &adjustment.tx_ref,
            TxKind::AdminAdjustment,
            &adjustment.amount,
            &adjustment.phone,
            adjustment.agent_id,
            json!({
                "direction": adjustment.direction.as_str(),
                "reason": adjustment.reason,
            }),
        );
        Ok(LedgerOutcome::Applied(state.snapshot(adjustment.agent_id)?))
    }

    async fn cashback_entries(&self, agent_id: Uuid) -> Result<Vec<CashbackEntry>, DatabaseError> {
        Ok(self
            .state()?
            .cashback
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VendAuditSink for MemoryStore {
    async fn record_attempt(&self, record: &VendAttemptRecord) -> Result<(), DatabaseError> {
        self.state()?.vend_attempts.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_data_tx(tx_ref: &str) -> NewTransaction {
        NewTransaction {
            tx_ref: tx_ref.to_string(),
            kind: TxKind::Data,
            amount: BigDecimal::from(500),
            phone: "08031234567".to_string(),
            agent_id: None,
            plan_id: Some("mtn-1gb".to_string()),
            network: Some("MTN".to_string()),
            ported: false,
        }
    }

    #[tokio::test]
    async fn duplicate_tx_ref_is_unique_violation() {
        let store = MemoryStore::new();
        store.insert(new_data_tx("T-1")).await.unwrap();
        let err = store.insert(new_data_tx("T-1")).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn delivered_transaction_is_never_failed() {
        let store = MemoryStore::new();
        store
            .seed_transaction(new_data_tx("T-9"), TxStatus::Delivered)
            .unwrap();
        assert!(!store
            .mark_failed("T-9", TxStatus::Delivered, json!({"reason": "late"}))
            .await
            .unwrap());
        let tx = store.find_by_ref("T-9").await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Delivered);
    }

    #[tokio::test]
    async fn claim_succeeds_once() {
        let store = MemoryStore::new();
        store.insert(new_data_tx("T-2")).await.unwrap();
        assert!(store.try_claim("T-2", json!({"m": 1})).await.unwrap());
        assert!(!store.try_claim("T-2", json!({"m": 2})).await.unwrap());
        let tx = store.find_by_ref("T-2").await.unwrap().unwrap();
        assert_eq!(tx.delivery_data, Some(json!({"m": 1})));
    }

    #[tokio::test]
    async fn reset_requires_failed_delivery_on_paid_tx() {
        let store = MemoryStore::new();
        store.insert(new_data_tx("T-3")).await.unwrap();
        assert!(store.mark_paid("T-3", json!({})).await.unwrap());
        assert!(!store.reset_delivery("T-3").await.unwrap());

        assert!(store.try_claim("T-3", json!({})).await.unwrap());
        assert!(store.fail_delivery("T-3", json!({"error": "x"})).await.unwrap());
        assert!(store.reset_delivery("T-3").await.unwrap());

        let tx = store.find_by_ref("T-3").await.unwrap().unwrap();
        assert_eq!(tx.delivery_state, DeliveryState::Unclaimed);
        assert!(tx.delivery_data.is_none());
    }

    #[tokio::test]
    async fn mark_paid_only_from_pending() {
        let store = MemoryStore::new();
        store.insert(new_data_tx("T-4")).await.unwrap();
        assert!(store.mark_paid("T-4", json!({})).await.unwrap());
        assert!(!store.mark_paid("T-4", json!({})).await.unwrap());
    }
}
