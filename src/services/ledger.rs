//! Agent wallet: purchases, funding, cashback and admin adjustments.
//!
//! Every balance change goes through one `LedgerStore` call that commits the
//! balance update, its transaction row and any cashback entry together.
//! Purchases are paid only on confirmed delivery.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    AdjustmentDirection, Agent, BalanceAdjustment, BalanceSnapshot, CashbackRedemption,
    DeliveryState, FundingCredit, LedgerOutcome, NewTransaction, PurchaseSettlement,
    Transaction, TxKind, TxStatus,
};
use crate::database::repository::{LedgerStore, TransactionStore};
use crate::error::{AppError, DomainError, ValidationError};
use crate::services::catalog::PlanCatalog;
use crate::services::security::{validate_phone, verify_pin};
use crate::vending::{Network, VendRequest, Vendor};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid phone number {phone}")]
    InvalidPhone { phone: String },

    #[error("unknown plan {plan_id}")]
    UnknownPlan { plan_id: String },

    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("agent {agent} not found")]
    AgentNotFound { agent: String },

    #[error("agent {agent_id} is inactive")]
    AgentInactive { agent_id: Uuid },

    #[error("PIN mismatch")]
    InvalidPin,

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: BigDecimal,
        required: BigDecimal,
    },

    #[error("insufficient cashback: available {available}, required {required}")]
    InsufficientCashback {
        available: BigDecimal,
        required: BigDecimal,
    },

    #[error("reference {tx_ref} already used")]
    DuplicateReference { tx_ref: String },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidPhone { phone } => {
                AppError::validation(ValidationError::InvalidPhone {
                    phone,
                    reason: "expected an 11-digit Nigerian mobile number".to_string(),
                })
            }
            LedgerError::UnknownPlan { plan_id } => {
                AppError::validation(ValidationError::UnknownPlan { plan_id })
            }
            LedgerError::InvalidAmount { amount, reason } => {
                AppError::validation(ValidationError::InvalidAmount { amount, reason })
            }
            LedgerError::AgentNotFound { agent } => {
                AppError::domain(DomainError::AgentNotFound { agent })
            }
            LedgerError::AgentInactive { agent_id } => AppError::domain(DomainError::AgentInactive {
                agent_id: agent_id.to_string(),
            }),
            LedgerError::InvalidPin => AppError::domain(DomainError::InvalidPin),
            LedgerError::InsufficientBalance {
                available,
                required,
            } => AppError::domain(DomainError::InsufficientBalance {
                available: available.to_string(),
                required: required.to_string(),
            }),
            LedgerError::InsufficientCashback {
                available,
                required,
            } => AppError::domain(DomainError::InsufficientCashback {
                available: available.to_string(),
                required: required.to_string(),
            }),
            LedgerError::DuplicateReference { tx_ref } => {
                AppError::domain(DomainError::DuplicateTransaction { tx_ref })
            }
            LedgerError::Store(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub agent_id: Uuid,
    pub pin: String,
    pub phone: String,
    pub plan_id: String,
    /// Overrides the plan's network, for ported numbers
    pub network: Option<Network>,
    pub ported: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub tx_ref: String,
    pub status: TxStatus,
    pub delivery_state: DeliveryState,
    pub amount: BigDecimal,
    pub cashback: BigDecimal,
    /// Balances after settlement; absent when nothing was debited
    pub balances: Option<BalanceSnapshot>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FundingRequest {
    pub account_number: String,
    pub gateway_ref: String,
    pub amount: BigDecimal,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FundingOutcome {
    Credited(BalanceSnapshot),
    /// This gateway reference was credited before
    Duplicate,
    /// No agent owns the receiving account
    UnknownAccount,
}

pub struct WalletLedger {
    ledger: Arc<dyn LedgerStore>,
    transactions: Arc<dyn TransactionStore>,
    vendor: Arc<dyn Vendor>,
    catalog: Arc<dyn PlanCatalog>,
    cashback_rate: BigDecimal,
}

fn new_reference(prefix: &str) -> String {
    format!("SAUKI-{}-{}", prefix, Uuid::new_v4().simple()).to_uppercase()
}

fn require_positive(amount: &BigDecimal) -> Result<(), LedgerError> {
    if *amount <= BigDecimal::from(0) {
        return Err(LedgerError::InvalidAmount {
            amount: amount.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl WalletLedger {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        transactions: Arc<dyn TransactionStore>,
        vendor: Arc<dyn Vendor>,
        catalog: Arc<dyn PlanCatalog>,
        cashback_rate: BigDecimal,
    ) -> Self {
        Self {
            ledger,
            transactions,
            vendor,
            catalog,
            cashback_rate,
        }
    }

    /// Cashback earned on a purchase of `amount`, to the kobo.
    pub fn cashback_for(&self, amount: &BigDecimal) -> BigDecimal {
        (amount * &self.cashback_rate).with_scale_round(2, RoundingMode::HalfUp)
    }

    async fn active_agent(&self, agent_id: Uuid) -> Result<Agent, LedgerError> {
        let agent = self
            .ledger
            .find_agent(agent_id)
            .await?
            .ok_or_else(|| LedgerError::AgentNotFound {
                agent: agent_id.to_string(),
            })?;
        if !agent.is_active {
            return Err(LedgerError::AgentInactive { agent_id });
        }
        Ok(agent)
    }

    /// Buy a data plan from the agent's wallet. Every check that can reject
    /// the purchase runs before the vendor is called; the debit happens only
    /// after the vendor confirms delivery.
    pub async fn purchase_data(
        &self,
        request: PurchaseRequest,
    ) -> Result<PurchaseReceipt, LedgerError> {
        let phone = validate_phone(&request.phone).map_err(|_| LedgerError::InvalidPhone {
            phone: request.phone.clone(),
        })?;
        let plan = self
            .catalog
            .find(&request.plan_id)
            .ok_or_else(|| LedgerError::UnknownPlan {
                plan_id: request.plan_id.clone(),
            })?;
        let agent = self.active_agent(request.agent_id).await?;
        if !verify_pin(&request.pin, &agent.pin_hash) {
            warn!(agent_id = %agent.id, "Purchase rejected, PIN mismatch");
            return Err(LedgerError::InvalidPin);
        }
        if agent.balance < plan.price {
            return Err(LedgerError::InsufficientBalance {
                available: agent.balance,
                required: plan.price,
            });
        }

        let network = request.network.unwrap_or(plan.network);
        let tx = self
            .transactions
            .insert(NewTransaction {
                tx_ref: new_reference("DATA"),
                kind: TxKind::Data,
                amount: plan.price.clone(),
                phone: phone.clone(),
                agent_id: Some(agent.id),
                plan_id: Some(plan.id.clone()),
                network: Some(network.as_str().to_string()),
                ported: request.ported,
            })
            .await?;

        let marker = json!({ "claimed_at": Utc::now().to_rfc3339(), "agent_id": agent.id });
        if !self.transactions.try_claim(&tx.tx_ref, marker).await? {
            warn!(tx_ref = %tx.tx_ref, "Fresh purchase already claimed");
            return self.receipt_from_store(&tx.tx_ref).await;
        }

        let vend = VendRequest {
            tx_ref: tx.tx_ref.clone(),
            network,
            mobile_number: phone,
            plan: plan.vendor_plan.clone(),
            ported: request.ported,
        };
        info!(tx_ref = %tx.tx_ref, agent_id = %agent.id, plan = %plan.id, "Vending agent purchase");

        let delivery_result = match self.vendor.vend(&vend).await {
            Ok(response) if response.success => json!({
                "provider": self.vendor.name(),
                "status_code": response.status_code,
                "response": response.payload,
                "delivered_at": Utc::now().to_rfc3339(),
            }),
            Ok(response) => {
                let failure = json!({
                    "error": "vendor_rejected",
                    "transient": false,
                    "status_code": response.status_code,
                    "response": response.payload,
                });
                return self.fail_purchase(&tx.tx_ref, failure).await;
            }
            Err(e) => {
                warn!(tx_ref = %tx.tx_ref, error = %e, "Agent purchase vend failed");
                return self.fail_purchase(&tx.tx_ref, e.to_failure_payload()).await;
            }
        };

        let cashback = self.cashback_for(&plan.price);
        let outcome = self
            .ledger
            .settle_purchase(&PurchaseSettlement {
                tx_ref: tx.tx_ref.clone(),
                agent_id: agent.id,
                amount: plan.price.clone(),
                cashback: cashback.clone(),
                delivery_result,
            })
            .await?;

        match outcome {
            LedgerOutcome::Applied(balances) => {
                info!(
                    tx_ref = %tx.tx_ref,
                    agent_id = %agent.id,
                    amount = %plan.price,
                    cashback = %cashback,
                    balance = %balances.balance,
                    "Agent purchase settled"
                );
                Ok(PurchaseReceipt {
                    tx_ref: tx.tx_ref,
                    status: TxStatus::Delivered,
                    delivery_state: DeliveryState::Fulfilled,
                    amount: plan.price,
                    cashback,
                    balances: Some(balances),
                    reason: "delivered".to_string(),
                })
            }
            LedgerOutcome::InsufficientFunds { available } => {
                error!(
                    tx_ref = %tx.tx_ref,
                    agent_id = %agent.id,
                    available = %available,
                    required = %plan.price,
                    "Delivered but balance no longer covers it, needs reconciliation"
                );
                self.receipt_from_store(&tx.tx_ref).await
            }
            LedgerOutcome::Duplicate => self.receipt_from_store(&tx.tx_ref).await,
        }
    }

    async fn fail_purchase(
        &self,
        tx_ref: &str,
        mut failure: JsonValue,
    ) -> Result<PurchaseReceipt, LedgerError> {
        failure["failed_at"] = JsonValue::String(Utc::now().to_rfc3339());
        if !self.ledger.fail_purchase(tx_ref, failure).await? {
            error!(tx_ref = %tx_ref, "Purchase failure not recorded, claim no longer held");
        }
        self.receipt_from_store(tx_ref).await
    }

    async fn receipt_from_store(&self, tx_ref: &str) -> Result<PurchaseReceipt, LedgerError> {
        let tx = self
            .transactions
            .find_by_ref(tx_ref)
            .await?
            .ok_or_else(|| DatabaseError::new(DatabaseErrorKind::NotFound))?;
        Ok(receipt(&tx))
    }

    /// Credit a wallet from a funding notification. Idempotent on the
    /// gateway reference.
    pub async fn fund(&self, request: FundingRequest) -> Result<FundingOutcome, LedgerError> {
        require_positive(&request.amount)?;
        let Some(agent) = self
            .ledger
            .find_agent_by_account(&request.account_number)
            .await?
        else {
            warn!(
                account_number = %request.account_number,
                gateway_ref = %request.gateway_ref,
                amount = %request.amount,
                "Unclaimed deposit, no agent owns this account"
            );
            return Ok(FundingOutcome::UnknownAccount);
        };

        let outcome = self
            .ledger
            .credit_funding(&FundingCredit {
                gateway_ref: request.gateway_ref.clone(),
                agent_id: agent.id,
                phone: agent.phone.clone(),
                amount: request.amount.clone(),
                payload: request.payload,
            })
            .await?;

        match outcome {
            LedgerOutcome::Applied(balances) => {
                info!(
                    agent_id = %agent.id,
                    gateway_ref = %request.gateway_ref,
                    amount = %request.amount,
                    balance = %balances.balance,
                    "Wallet funded"
                );
                Ok(FundingOutcome::Credited(balances))
            }
            LedgerOutcome::Duplicate | LedgerOutcome::InsufficientFunds { .. } => {
                info!(gateway_ref = %request.gateway_ref, "Funding already credited");
                Ok(FundingOutcome::Duplicate)
            }
        }
    }

    /// Move cashback into the main balance. Needs the agent's PIN, same as
    /// a purchase.
    pub async fn redeem_cashback(
        &self,
        agent_id: Uuid,
        pin: &str,
        amount: BigDecimal,
    ) -> Result<BalanceSnapshot, LedgerError> {
        require_positive(&amount)?;
        let agent = self.active_agent(agent_id).await?;
        if !verify_pin(pin, &agent.pin_hash) {
            warn!(agent_id = %agent.id, "Cashback redemption rejected, PIN mismatch");
            return Err(LedgerError::InvalidPin);
        }
        let tx_ref = new_reference("CBR");

        let outcome = self
            .ledger
            .redeem_cashback(&CashbackRedemption {
                tx_ref: tx_ref.clone(),
                agent_id,
                phone: agent.phone,
                amount: amount.clone(),
            })
            .await?;

        match outcome {
            LedgerOutcome::Applied(balances) => {
                info!(
                    agent_id = %agent_id,
                    tx_ref = %tx_ref,
                    amount = %amount,
                    "Cashback redeemed"
                );
                Ok(balances)
            }
            LedgerOutcome::InsufficientFunds { available } => {
                Err(LedgerError::InsufficientCashback {
                    available,
                    required: amount,
                })
            }
            LedgerOutcome::Duplicate => Err(LedgerError::DuplicateReference { tx_ref }),
        }
    }

    /// Manual credit or debit. A debit never takes the balance below zero.
    pub async fn admin_adjust(
        &self,
        agent_id: Uuid,
        direction: AdjustmentDirection,
        amount: BigDecimal,
        reason: &str,
    ) -> Result<BalanceSnapshot, LedgerError> {
        require_positive(&amount)?;
        let agent = self
            .ledger
            .find_agent(agent_id)
            .await?
            .ok_or_else(|| LedgerError::AgentNotFound {
                agent: agent_id.to_string(),
            })?;
        let tx_ref = new_reference("ADJ");

        let outcome = self
            .ledger
            .adjust_balance(&BalanceAdjustment {
                tx_ref: tx_ref.clone(),
                agent_id,
                phone: agent.phone,
                direction,
                amount: amount.clone(),
                reason: reason.to_string(),
            })
            .await?;

        match outcome {
            LedgerOutcome::Applied(balances) => Ok(balances),
            LedgerOutcome::InsufficientFunds { available } => {
                Err(LedgerError::InsufficientBalance {
                    available,
                    required: amount,
                })
            }
            LedgerOutcome::Duplicate => Err(LedgerError::DuplicateReference { tx_ref }),
        }
    }
}

fn receipt(tx: &Transaction) -> PurchaseReceipt {
    let reason = match (tx.status, tx.delivery_state) {
        (TxStatus::Delivered, _) => "delivered".to_string(),
        (TxStatus::Failed, DeliveryState::Fulfilled) => {
            "insufficient_balance_at_settlement".to_string()
        }
        (TxStatus::Failed, _) => tx
            .delivery_data
            .as_ref()
            .and_then(|d| d.get("error"))
            .and_then(|e| e.as_str())
            .map(|e| format!("delivery failed: {}", e))
            .unwrap_or_else(|| "delivery failed".to_string()),
        _ => "processing".to_string(),
    };
    PurchaseReceipt {
        tx_ref: tx.tx_ref.clone(),
        status: tx.status,
        delivery_state: tx.delivery_state,
        amount: tx.amount.clone(),
        cashback: BigDecimal::from(0),
        balances: None,
        reason,
    }
}
