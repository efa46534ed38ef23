//! Sauki payment reconciliation and delivery engine
//!
//! Confirms gateway payments (polling, scheduled reconciliation, webhooks),
//! delivers the purchased data bundle exactly once per paid transaction, and
//! keeps the agent wallet ledger.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod resilience;
pub mod services;
pub mod vending;
pub mod workers;
