//! Fixed-window attempt counters for authentication and purchase endpoints.
//!
//! Counters live behind [`RateLimitStore`] so replicas can share them through
//! Redis; [`MemoryRateLimitStore`] is per-process and only best-effort.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use crate::cache::keys::ratelimit::CounterKey;
use crate::error::{AppError, AppErrorKind, InfrastructureError, SecurityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    Registration,
    Support,
    Purchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_attempts: u64,
    pub window: Duration,
}

impl RateLimitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Login => "login",
            RateLimitAction::Registration => "registration",
            RateLimitAction::Support => "support",
            RateLimitAction::Purchase => "purchase",
        }
    }

    pub fn rule(&self) -> RateLimitRule {
        match self {
            RateLimitAction::Login => RateLimitRule {
                max_attempts: 5,
                window: Duration::from_secs(15 * 60),
            },
            RateLimitAction::Registration => RateLimitRule {
                max_attempts: 3,
                window: Duration::from_secs(60 * 60),
            },
            RateLimitAction::Support => RateLimitRule {
                max_attempts: 5,
                window: Duration::from_secs(60 * 60),
            },
            RateLimitAction::Purchase => RateLimitRule {
                max_attempts: 20,
                window: Duration::from_secs(60),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("too many {action} attempts, retry in {retry_after_secs}s")]
    Exceeded {
        action: &'static str,
        retry_after_secs: u64,
    },

    #[error("rate limit store error: {0}")]
    Store(String),
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Exceeded {
                action,
                retry_after_secs,
            } => AppError::security(SecurityError::RateLimited {
                action: action.to_string(),
                retry_after_secs,
            }),
            RateLimitError::Store(message) => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache { message }))
            }
        }
    }
}

/// Counter state after one hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub resets_in: Duration,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the counter for `key`, opening a window of `window` if none
    /// is running.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError>;

    async fn clear(&self, key: &str) -> Result<(), RateLimitError>;
}

/// Per-process counters
#[derive(Default)]
pub struct MemoryRateLimitStore {
    counters: DashMap<String, (u64, Instant)>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(WindowCount {
            count: entry.0,
            resets_in: entry.1.saturating_duration_since(now),
        })
    }

    async fn clear(&self, key: &str) -> Result<(), RateLimitError> {
        self.counters.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::new()), true)
    }

    /// Count one attempt. A store outage lets the attempt through.
    pub async fn check(
        &self,
        action: RateLimitAction,
        identifier: &str,
    ) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }
        let rule = action.rule();
        let key = CounterKey::new(action.as_str(), identifier).to_string();

        let window = match self.store.hit(&key, rule.window).await {
            Ok(window) => window,
            Err(e) => {
                warn!(
                    action = action.as_str(),
                    error = %e,
                    "Rate limit store unavailable, allowing request"
                );
                return Ok(());
            }
        };

        if window.count > rule.max_attempts {
            let retry_after_secs = window.resets_in.as_secs_f64().ceil().max(1.0) as u64;
            warn!(
                action = action.as_str(),
                identifier = %identifier,
                attempts = window.count,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(RateLimitError::Exceeded {
                action: action.as_str(),
                retry_after_secs,
            });
        }
        Ok(())
    }

    /// Forget the counter, e.g. after a successful login.
    pub async fn reset(&self, action: RateLimitAction, identifier: &str) {
        let key = CounterKey::new(action.as_str(), identifier).to_string();
        if let Err(e) = self.store.clear(&key).await {
            warn!(action = action.as_str(), error = %e, "Failed to reset rate limit counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl RateLimitStore for BrokenStore {
        async fn hit(&self, _key: &str, _window: Duration) -> Result<WindowCount, RateLimitError> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }

        async fn clear(&self, _key: &str) -> Result<(), RateLimitError> {
            Err(RateLimitError::Store("connection refused".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn login_blocks_after_five_attempts() {
        let limiter = RateLimiter::in_memory();
        for _ in 0..5 {
            limiter.check(RateLimitAction::Login, "08031234567").await.unwrap();
        }
        match limiter.check(RateLimitAction::Login, "08031234567").await {
            Err(RateLimitError::Exceeded {
                action,
                retry_after_secs,
            }) => {
                assert_eq!(action, "login");
                assert!(retry_after_secs > 0 && retry_after_secs <= 15 * 60);
            }
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_allows_again() {
        let limiter = RateLimiter::in_memory();
        for _ in 0..21 {
            let _ = limiter.check(RateLimitAction::Purchase, "agent-1").await;
        }
        assert!(limiter.check(RateLimitAction::Purchase, "agent-1").await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check(RateLimitAction::Purchase, "agent-1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn actions_and_identifiers_are_independent() {
        let limiter = RateLimiter::in_memory();
        for _ in 0..3 {
            limiter.check(RateLimitAction::Registration, "1.2.3.4").await.unwrap();
        }
        assert!(limiter.check(RateLimitAction::Registration, "1.2.3.4").await.is_err());
        assert!(limiter.check(RateLimitAction::Registration, "5.6.7.8").await.is_ok());
        assert!(limiter.check(RateLimitAction::Support, "1.2.3.4").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_counter() {
        let limiter = RateLimiter::in_memory();
        for _ in 0..5 {
            limiter.check(RateLimitAction::Login, "08031234567").await.unwrap();
        }
        limiter.reset(RateLimitAction::Login, "08031234567").await;
        assert!(limiter.check(RateLimitAction::Login, "08031234567").await.is_ok());
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore), true);
        for _ in 0..10 {
            assert!(limiter.check(RateLimitAction::Login, "x").await.is_ok());
        }
    }

    #[test]
    fn exceeded_maps_to_429() {
        let err: AppError = RateLimitError::Exceeded {
            action: "login",
            retry_after_secs: 42,
        }
        .into();
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.retry_after(), Some(42));
    }
}
