//! Health check module
//! Reports the store, the cache and the vending circuit breaker

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

#[cfg(feature = "cache")]
use crate::cache::RedisPool;
use crate::resilience::circuit_breaker::{BreakerState, CircuitBreaker};

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application. Components that are not configured
/// (in-memory mode) are simply not reported.
#[derive(Clone, Default)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    cache: Option<RedisPool>,
    vending_breaker: Option<Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, pool: RedisPool) -> Self {
        self.cache = Some(pool);
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.vending_breaker = Some(breaker);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut unhealthy = false;
        let mut degraded = false;

        if let Some(pool) = &self.db_pool {
            let component = timed_check("database", check_database_health(pool)).await;
            unhealthy |= component.status == ComponentState::Down;
            health_status.checks.insert("database".to_string(), component);
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = &self.cache {
            let component = timed_check("cache", check_cache_health(pool)).await;
            // The limiter fails open, so a cache outage only degrades.
            degraded |= component.status == ComponentState::Down;
            health_status.checks.insert("cache".to_string(), component);
        }

        if let Some(breaker) = &self.vending_breaker {
            let component = breaker_health(breaker);
            degraded |= component.status != ComponentState::Up;
            health_status
                .checks
                .insert("vending_provider".to_string(), component);
        }

        health_status.status = if unhealthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

async fn timed_check<F>(name: &str, check: F) -> ComponentHealth
where
    F: std::future::Future<Output = Result<u128, Box<dyn std::error::Error + Send + Sync>>>,
{
    match timeout(Duration::from_secs(5), check).await {
        Ok(Ok(response_time)) => {
            info!("{} health check: OK ({}ms)", name, response_time);
            ComponentHealth::up(Some(response_time))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", name, e);
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!("{} health check timed out", name);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

/// Closed is up, half-open is a warning, open is down.
pub fn breaker_health(breaker: &CircuitBreaker) -> ComponentHealth {
    let state = breaker.state();
    let details = Some(format!(
        "circuit {} ({} consecutive failures)",
        state.as_str(),
        breaker.consecutive_failures()
    ));
    match state {
        BreakerState::Closed => ComponentHealth {
            status: ComponentState::Up,
            response_time_ms: None,
            details,
        },
        BreakerState::HalfOpen => ComponentHealth::warning(None, details),
        BreakerState::Open => {
            warn!(breaker = breaker.name(), "Vending circuit is open");
            ComponentHealth::down(details)
        }
    }
}

pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();
    crate::database::health_check(pool)
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
}

#[cfg(feature = "cache")]
pub async fn check_cache_health(
    pool: &RedisPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();
    crate::cache::health_check(pool)
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));
    }

    #[tokio::test]
    async fn open_breaker_degrades_health() {
        let breaker = Arc::new(CircuitBreaker::new(
            "vending",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        ));
        let checker = HealthChecker::new().with_breaker(breaker.clone());
        assert!(checker.check_health().await.is_healthy());

        let permit = breaker.try_acquire().unwrap();
        breaker.record_failure(permit);

        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks["vending_provider"].status, ComponentState::Down);
    }
}
