//! Failure handling around unreliable upstream calls

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use retry::{retry_with_backoff, RetryConfig};
