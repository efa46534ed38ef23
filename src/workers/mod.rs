//! Background workers

pub mod payment_monitor;
