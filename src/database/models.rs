//! Persistent entities and the inputs to ledger mutations.
//!
//! Enumerated columns are stored as TEXT guarded by CHECK constraints; the
//! enums here own the string forms.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Paid,
    Delivered,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Paid => "paid",
            TxStatus::Delivered => "delivered",
            TxStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TxStatus::Pending),
            "paid" => Some(TxStatus::Paid),
            "delivered" => Some(TxStatus::Delivered),
            "failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }

    /// Statuses never move backwards; `delivered` and `failed` are final.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Paid)
                | (TxStatus::Pending, TxStatus::Delivered)
                | (TxStatus::Pending, TxStatus::Failed)
                | (TxStatus::Paid, TxStatus::Delivered)
                | (TxStatus::Paid, TxStatus::Failed)
        )
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Data,
    Ecommerce,
    WalletFunding,
    CashbackRedemption,
    AdminAdjustment,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Data => "data",
            TxKind::Ecommerce => "ecommerce",
            TxKind::WalletFunding => "wallet_funding",
            TxKind::CashbackRedemption => "cashback_redemption",
            TxKind::AdminAdjustment => "admin_adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "data" => Some(TxKind::Data),
            "ecommerce" => Some(TxKind::Ecommerce),
            "wallet_funding" => Some(TxKind::WalletFunding),
            "cashback_redemption" => Some(TxKind::CashbackRedemption),
            "admin_adjustment" => Some(TxKind::AdminAdjustment),
            _ => None,
        }
    }

    /// Only data bundles are vended after payment
    pub fn requires_fulfilment(&self) -> bool {
        matches!(self, TxKind::Data)
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Claim marker state. `Unclaimed` is the only state that can be claimed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Unclaimed,
    Claiming,
    Fulfilled,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Unclaimed => "unclaimed",
            DeliveryState::Claiming => "claiming",
            DeliveryState::Fulfilled => "fulfilled",
            DeliveryState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unclaimed" => Some(DeliveryState::Unclaimed),
            "claiming" => Some(DeliveryState::Claiming),
            "fulfilled" => Some(DeliveryState::Fulfilled),
            "failed" => Some(DeliveryState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CashbackDirection {
    Earned,
    Redeemed,
}

impl CashbackDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashbackDirection::Earned => "earned",
            CashbackDirection::Redeemed => "redeemed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    Credit,
    Debit,
}

impl AdjustmentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentDirection::Credit => "credit",
            AdjustmentDirection::Debit => "debit",
        }
    }
}

/// A payment intent and its fulfilment record
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub tx_ref: String,
    pub kind: TxKind,
    pub status: TxStatus,
    pub amount: BigDecimal,
    pub phone: String,
    pub agent_id: Option<Uuid>,
    pub plan_id: Option<String>,
    pub network: Option<String>,
    pub ported: bool,
    pub gateway_response: Option<JsonValue>,
    pub delivery_state: DeliveryState,
    pub delivery_data: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Agent purchases settle through the wallet ledger, never the gateway.
    pub fn is_agent_wallet_purchase(&self) -> bool {
        self.agent_id.is_some() && self.kind == TxKind::Data
    }

    pub fn awaits_fulfilment(&self) -> bool {
        self.status == TxStatus::Paid
            && self.kind.requires_fulfilment()
            && self.delivery_state == DeliveryState::Unclaimed
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tx_ref: String,
    pub kind: TxKind,
    pub amount: BigDecimal,
    pub phone: String,
    pub agent_id: Option<Uuid>,
    pub plan_id: Option<String>,
    pub network: Option<String>,
    pub ported: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub phone: String,
    pub name: String,
    pub account_number: Option<String>,
    pub balance: BigDecimal,
    pub cashback_balance: BigDecimal,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub pin_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub phone: String,
    pub name: String,
    pub account_number: Option<String>,
    pub pin_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashbackEntry {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub direction: CashbackDirection,
    pub amount: BigDecimal,
    pub tx_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VendAttemptOutcome {
    Success,
    Rejected,
    TransientError,
    PermanentError,
}

impl VendAttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendAttemptOutcome::Success => "success",
            VendAttemptOutcome::Rejected => "rejected",
            VendAttemptOutcome::TransientError => "transient_error",
            VendAttemptOutcome::PermanentError => "permanent_error",
        }
    }
}

/// One call to the vending provider
#[derive(Debug, Clone, Serialize)]
pub struct VendAttemptRecord {
    pub tx_ref: String,
    pub attempt: u32,
    pub provider: String,
    pub duration_ms: u64,
    pub status_code: Option<u16>,
    pub outcome: VendAttemptOutcome,
    pub error: Option<String>,
}

/// Balances after a ledger mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub agent_id: Uuid,
    pub balance: BigDecimal,
    pub cashback_balance: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    Applied(BalanceSnapshot),
    /// The mutation was already applied under this reference
    Duplicate,
    /// The conditional debit matched no row
    InsufficientFunds { available: BigDecimal },
}

/// Settlement of a vended agent purchase: debit, deliver, accrue cashback.
#[derive(Debug, Clone)]
pub struct PurchaseSettlement {
    pub tx_ref: String,
    pub agent_id: Uuid,
    pub amount: BigDecimal,
    pub cashback: BigDecimal,
    pub delivery_result: JsonValue,
}

#[derive(Debug, Clone)]
pub struct FundingCredit {
    pub gateway_ref: String,
    pub agent_id: Uuid,
    pub phone: String,
    pub amount: BigDecimal,
    pub payload: JsonValue,
}

#[derive(Debug, Clone)]
pub struct CashbackRedemption {
    pub tx_ref: String,
    pub agent_id: Uuid,
    pub phone: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct BalanceAdjustment {
    pub tx_ref: String,
    pub agent_id: Uuid,
    pub phone: String,
    pub direction: AdjustmentDirection,
    pub amount: BigDecimal,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_moves_backwards() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Paid));
        assert!(TxStatus::Paid.can_transition_to(TxStatus::Delivered));
        assert!(!TxStatus::Paid.can_transition_to(TxStatus::Pending));
        assert!(!TxStatus::Delivered.can_transition_to(TxStatus::Failed));
        assert!(!TxStatus::Failed.can_transition_to(TxStatus::Paid));
    }

    #[test]
    fn string_forms_round_trip() {
        for status in [
            TxStatus::Pending,
            TxStatus::Paid,
            TxStatus::Delivered,
            TxStatus::Failed,
        ] {
            assert_eq!(TxStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TxKind::from_str("wallet_funding"), Some(TxKind::WalletFunding));
        assert_eq!(DeliveryState::from_str("claiming"), Some(DeliveryState::Claiming));
        assert_eq!(TxKind::from_str("airtime"), None);
    }

    #[test]
    fn only_data_requires_fulfilment() {
        assert!(TxKind::Data.requires_fulfilment());
        assert!(!TxKind::Ecommerce.requires_fulfilment());
        assert!(!TxKind::WalletFunding.requires_fulfilment());
    }
}
