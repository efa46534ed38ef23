//! Rate limit counters shared by every replica through Redis

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::error::CacheError;
use super::RedisPool;
use crate::services::rate_limiter::{RateLimitError, RateLimitStore, WindowCount};

#[derive(Clone)]
pub struct RedisRateLimitStore {
    pool: RedisPool,
}

impl RedisRateLimitStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

impl From<CacheError> for RateLimitError {
    fn from(err: CacheError) -> Self {
        RateLimitError::Store(err.to_string())
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;

        let (count, mut ttl_ms): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        // A counter without expiry is a fresh window, or one whose PEXPIRE
        // was lost; either way it gets the full window.
        if ttl_ms < 0 {
            let window_ms = window.as_millis() as i64;
            let _: i64 = redis::cmd("PEXPIRE")
                .arg(key)
                .arg(window_ms)
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;
            ttl_ms = window_ms;
        }

        debug!(key = %key, count, ttl_ms, "Rate limit hit");
        Ok(WindowCount {
            count,
            resets_in: Duration::from_millis(ttl_ms as u64),
        })
    }

    async fn clear(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{init_cache_pool, CachePoolConfig};

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_redis_counter_window() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let pool = init_cache_pool(CachePoolConfig {
            redis_url: url,
            ..Default::default()
        })
        .await
        .unwrap();
        let store = RedisRateLimitStore::new(pool);
        let key = format!("v1:ratelimit:test:{}", uuid::Uuid::new_v4());

        let first = store.hit(&key, Duration::from_secs(60)).await.unwrap();
        let second = store.hit(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.resets_in <= Duration::from_secs(60));

        store.clear(&key).await.unwrap();
        assert_eq!(store.hit(&key, Duration::from_secs(60)).await.unwrap().count, 1);
        store.clear(&key).await.unwrap();
    }
}
