//! Services module for business logic

pub mod admin;
pub mod agents;
pub mod catalog;
pub mod delivery;
pub mod ledger;
pub mod rate_limiter;
pub mod security;
pub mod verifier;
pub mod webhook_processor;

pub use delivery::DeliveryService;
pub use ledger::WalletLedger;
pub use verifier::{PaymentVerifier, VerificationOutcome};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor};
