//! Redis layer for state shared between replicas
//!
//! Only rate limit counters live here. The pool and the Redis-backed store
//! are compiled with the `cache` feature; key builders are always available
//! so the in-memory limiter names its counters the same way.

pub mod error;
pub mod keys;
#[cfg(feature = "cache")]
pub mod rate_limit;

#[cfg(feature = "cache")]
pub use pool::*;

#[cfg(feature = "cache")]
mod pool {
    use bb8::Pool;
    use bb8_redis::RedisConnectionManager;
    use std::time::Duration;
    use tracing::{error, info, warn};

    use super::error::CacheError;
    use crate::config::CacheConfig;

    /// Redis connection pool type alias
    pub type RedisPool = Pool<RedisConnectionManager>;

    #[derive(Debug, Clone)]
    pub struct CachePoolConfig {
        pub redis_url: String,
        pub max_connections: u32,
        pub min_idle: u32,
        pub connection_timeout: Duration,
        pub max_lifetime: Duration,
        pub idle_timeout: Duration,
    }

    impl Default for CachePoolConfig {
        fn default() -> Self {
            Self {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                max_connections: 20,
                min_idle: 2,
                connection_timeout: Duration::from_secs(5),
                max_lifetime: Duration::from_secs(300),
                idle_timeout: Duration::from_secs(60),
            }
        }
    }

    impl From<&CacheConfig> for CachePoolConfig {
        fn from(config: &CacheConfig) -> Self {
            Self {
                redis_url: config.redis_url.clone(),
                max_connections: config.max_connections,
                ..Self::default()
            }
        }
    }

    /// Initialize the Redis pool. An unreachable server is logged but does
    /// not fail startup; the rate limiter lets requests through meanwhile.
    pub async fn init_cache_pool(config: CachePoolConfig) -> Result<RedisPool, CacheError> {
        info!(
            "Initializing Redis cache pool: max_connections={}",
            config.max_connections
        );

        let manager = RedisConnectionManager::new(config.redis_url.as_str()).map_err(|e| {
            error!("Failed to create Redis connection manager: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_idle))
            .connection_timeout(config.connection_timeout)
            .max_lifetime(Some(config.max_lifetime))
            .idle_timeout(Some(config.idle_timeout))
            .test_on_check_out(false)
            .build(manager)
            .await
            .map_err(|e| {
                error!("Failed to build Redis connection pool: {}", e);
                CacheError::ConnectionError(e.to_string())
            })?;

        if let Err(e) = health_check(&pool).await {
            warn!("Initial Redis connection test failed, but continuing: {}", e);
        }

        info!("Redis cache pool initialized successfully");
        Ok(pool)
    }

    /// PING through a pooled connection
    pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    /// Connections close when the last pool handle drops; this records the
    /// pool state at shutdown.
    pub async fn shutdown_cache_pool(pool: &RedisPool) {
        let state = pool.state();
        info!(
            connections = state.connections,
            idle = state.idle_connections,
            "Shutting down Redis cache pool"
        );
    }
}
