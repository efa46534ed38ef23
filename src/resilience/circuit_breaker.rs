//! Circuit breaker for a single upstream dependency.
//!
//! Closed: calls pass, consecutive failures are counted. Open: calls are
//! rejected without running until `open_timeout` elapses. Half-open: at most
//! `half_open_max_calls` trials run; `success_threshold` trial successes close
//! the breaker and any trial failure re-opens it.
//!
//! State lives in atomics owned by the instance, so it is shared by every
//! task in this process and by nothing outside it.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// Time spent open before trials are allowed
    pub open_timeout: Duration,
    /// Trials admitted per half-open period
    pub half_open_max_calls: u32,
    /// Trial successes needed to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker for {service} is open")]
    Open { service: String },

    #[error("{0}")]
    Inner(E),
}

/// Ticket for one admitted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Normal,
    Trial,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    trials_admitted: AtomicU32,
    trial_successes: AtomicU32,
    opened_at_ms: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            trials_admitted: AtomicU32::new(0),
            trial_successes: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Ask to run one call. `None` means the breaker is open.
    pub fn try_acquire(&self) -> Option<Permit> {
        loop {
            match self.state.load(Ordering::Acquire) {
                CLOSED => return Some(Permit::Normal),
                OPEN => {
                    let opened_at = self.opened_at_ms.load(Ordering::Acquire);
                    let open_for = self.now_ms().saturating_sub(opened_at);
                    if open_for < self.config.open_timeout.as_millis() as u64 {
                        return None;
                    }
                    // Either we move it to half-open or someone else already did.
                    if self
                        .state
                        .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        info!(breaker = %self.name, "Circuit breaker half-open, admitting trials");
                    }
                }
                _ => {
                    let admitted = self.trials_admitted.fetch_add(1, Ordering::AcqRel);
                    if admitted < self.config.half_open_max_calls {
                        return Some(Permit::Trial);
                    }
                    self.trials_admitted.fetch_sub(1, Ordering::AcqRel);
                    return None;
                }
            }
        }
    }

    pub fn record_success(&self, permit: Permit) {
        match permit {
            Permit::Normal => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            Permit::Trial => {
                if self.state.load(Ordering::Acquire) != HALF_OPEN {
                    return;
                }
                let successes = self.trial_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    if self
                        .state
                        .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.consecutive_failures.store(0, Ordering::Release);
                        info!(breaker = %self.name, "Circuit breaker closed after half-open trial");
                    }
                } else {
                    // Free the slot for the next trial.
                    self.trials_admitted.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
    }

    pub fn record_failure(&self, permit: Permit) {
        match permit {
            Permit::Normal => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold
                    && self.state.load(Ordering::Acquire) == CLOSED
                {
                    self.trip(CLOSED, failures);
                }
            }
            Permit::Trial => {
                if self.state.load(Ordering::Acquire) == HALF_OPEN {
                    self.trip(HALF_OPEN, self.consecutive_failures());
                }
            }
        }
    }

    fn trip(&self, from: u8, failures: u32) {
        // opened_at is only read while open, so it must be in place first.
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        if self
            .state
            .compare_exchange(from, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.trials_admitted.store(0, Ordering::Release);
            self.trial_successes.store(0, Ordering::Release);
            warn!(
                breaker = %self.name,
                consecutive_failures = failures,
                open_for_secs = self.config.open_timeout.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// Run `operation` under the breaker. Errors for which `is_failure`
    /// returns false pass through without counting against the breaker.
    pub async fn call<F, Fut, T, E>(
        &self,
        operation: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or_else(|| CircuitBreakerError::Open {
            service: self.name.clone(),
        })?;

        match operation().await {
            Ok(value) => {
                self.record_success(permit);
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.record_failure(permit);
                } else {
                    // The dependency answered; it is reachable.
                    self.record_success(permit);
                }
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "vendor",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_timeout,
                half_open_max_calls: 1,
                success_threshold: 1,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("boom") }, |_| true).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_without_running() {
        let cb = breaker(3, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(matches!(fail(&cb).await, Err(CircuitBreakerError::Inner(_))));
        }
        assert_eq!(cb.state(), BreakerState::Open);

        let mut ran = false;
        let result = cb
            .call(
                || {
                    ran = true;
                    async { Ok::<_, &str>(()) }
                },
                |_| true,
            )
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes() {
        let cb = breaker(2, Duration::from_secs(30));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let result = cb.call(|| async { Ok::<_, &str>(7) }, |_| true).await;
        assert_eq!(result.ok(), Some(7));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens() {
        let cb = breaker(1, Duration::from_secs(30));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(matches!(fail(&cb).await, Err(CircuitBreakerError::Inner(_))));
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(matches!(fail(&cb).await, Err(CircuitBreakerError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_limited_trials() {
        let cb = breaker(1, Duration::from_secs(30));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cb.try_acquire(), Some(Permit::Trial));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert_eq!(cb.try_acquire(), None);
    }

    #[tokio::test]
    async fn ignored_errors_do_not_trip() {
        let cb = breaker(2, Duration::from_secs(30));
        for _ in 0..5 {
            let _ = cb.call(|| async { Err::<(), _>("400") }, |_| false).await;
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn success_resets_consecutive_count() {
        let cb = breaker(3, Duration::from_secs(30));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        let _ = cb.call(|| async { Ok::<_, &str>(()) }, |_| true).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.consecutive_failures(), 1);
    }
}
