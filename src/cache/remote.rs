//! Remote key-value tier.
//!
//! [`RemoteStore`] is the seam the two-tier cache talks to; [`RedisStore`] is
//! the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use super::{CacheError, KeyTtl};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store `value`; a zero `ttl` stores the key without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError>;

    async fn flush(&self) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;

    /// Free-form server statistics for administrative output.
    async fn info(&self) -> Result<String, CacheError>;
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Remote(err.to_string())
    }
}

/// Redis-backed remote tier over a reconnecting multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a connection and verify it with `PING`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Remote(format!("connection timed out after {timeout:?}")))??;

        let store = Self { conn };
        store.ping().await?;
        Ok(store)
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection();
        if ttl.is_zero() {
            let _: () = conn.set(key, value).await?;
        } else {
            let _: () = conn.pset_ex(key, value, millis(ttl)).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut conn = self.connection();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let ms = i64::try_from(millis(ttl)).unwrap_or(i64::MAX);
        let applied: bool = conn.pexpire(key, ms).await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let mut conn = self.connection();
        let ms: i64 = conn.pttl(key).await?;
        Ok(KeyTtl::from_redis_millis(ms))
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn info(&self) -> Result<String, CacheError> {
        let mut conn = self.connection();
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        Ok(info)
    }
}
