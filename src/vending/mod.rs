//! Typed client for the upstream data vending API

pub mod client;
pub mod success;
pub mod types;

pub use client::{Vendor, VendingClient};
pub use types::{Network, VendError, VendRequest, VendResponse};
