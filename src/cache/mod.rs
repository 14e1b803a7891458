//! Marketplace Cache System
//!
//! A two-tier key/value cache:
//!
//! - **Remote tier** (Redis): tried first for every operation.
//! - **Local tier** (in-process map): an availability fallback used when the
//!   remote tier is absent or failing.
//!
//! The tiers are not reconciled. A value written during a remote outage lives
//! only in the local tier and is shadowed by the remote tier once it answers
//! again; a successful remote write evicts the local copy of the same key so
//! a later outage cannot resurface it.
//!
//! Operations that have no local equivalent (`delete_by_pattern`,
//! `set_expiration`, `ttl`) fail with [`CacheError::Unavailable`] when the
//! remote tier is absent or unreachable.

mod config;
pub mod keys;
mod local;
mod remote;

use std::{sync::Arc, time::Duration};

use metrics::{counter, gauge};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

pub use config::CacheConfig;
pub use local::LocalStore;
pub use remote::{RedisStore, RemoteStore};

const SOURCE: &str = "marketplace::cache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("remote cache is unavailable for `{operation}`")]
    Unavailable { operation: &'static str },
    #[error("failed to serialize cache value: {0}")]
    Serialization(String),
    #[error("remote cache error: {0}")]
    Remote(String),
}

impl CacheError {
    fn unavailable(operation: &'static str) -> Self {
        Self::Unavailable { operation }
    }
}

/// A value read back from either tier.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    /// The payload parsed as JSON.
    Structured(serde_json::Value),
    /// The payload was not JSON and is returned verbatim.
    Raw(String),
}

impl CachedValue {
    fn from_payload(payload: String) -> Self {
        match serde_json::from_str(&payload) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(payload),
        }
    }
}

/// Remaining lifetime of a remote key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "millis", rename_all = "snake_case")]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(u64),
}

impl KeyTtl {
    pub(crate) fn from_redis_millis(ms: i64) -> Self {
        match ms {
            -2 => Self::Missing,
            ms if ms < 0 => Self::Persistent,
            ms => Self::Expires(ms.unsigned_abs()),
        }
    }

    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Expires(ms) => Some(Duration::from_millis(ms)),
            Self::Missing | Self::Persistent => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub local_entries: usize,
    pub remote_configured: bool,
    pub remote_available: bool,
    pub remote_info: Option<String>,
}

/// Liveness of each tier, reported independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub remote: bool,
    pub local: bool,
}

impl CacheHealth {
    /// The cache is usable as long as the local tier is.
    pub fn is_healthy(&self) -> bool {
        self.local
    }
}

pub struct TwoTierCache {
    remote: Option<Arc<dyn RemoteStore>>,
    local: LocalStore,
    config: CacheConfig,
}

impl TwoTierCache {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, config: CacheConfig) -> Self {
        Self {
            remote,
            local: LocalStore::new(),
            config,
        }
    }

    /// Cache with no remote tier; every operation lands on the local store.
    pub fn local_only(config: CacheConfig) -> Self {
        Self::new(None, config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Serialize `value` as JSON and store it, falling back to the local tier
    /// when the remote write fails. Only a serialization failure is reported.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let payload =
            serde_json::to_string(value).map_err(|err| CacheError::Serialization(err.to_string()))?;
        self.set_raw(key, payload, ttl).await;
        Ok(())
    }

    pub async fn set_raw(&self, key: &str, payload: String, ttl: Duration) {
        if let Some(remote) = &self.remote {
            match remote.set(key, &payload, ttl).await {
                Ok(()) => {
                    self.local.remove(key);
                    return;
                }
                Err(err) => {
                    counter!("marketplace_cache_fallback_total", "op" => "set").increment(1);
                    warn!(target = SOURCE, key, error = %err, "remote set failed; using local tier");
                }
            }
        }
        self.local.set(key, payload, ttl);
    }

    /// Read the payload of `key` from the first tier that has it.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(payload)) => {
                    counter!("marketplace_cache_hit_total", "tier" => "remote").increment(1);
                    return Some(payload);
                }
                Ok(None) => {}
                Err(err) => {
                    counter!("marketplace_cache_fallback_total", "op" => "get").increment(1);
                    debug!(target = SOURCE, key, error = %err, "remote get failed; using local tier");
                }
            }
        }

        let local = self.local.get(key);
        if local.is_some() {
            counter!("marketplace_cache_hit_total", "tier" => "local").increment(1);
        } else {
            counter!("marketplace_cache_miss_total").increment(1);
        }
        local
    }

    /// Structured payloads come back parsed; anything else as the raw string.
    pub async fn get_value(&self, key: &str) -> Option<CachedValue> {
        self.get_raw(key).await.map(CachedValue::from_payload)
    }

    /// Typed read. A payload that does not decode as `T` is treated as a miss.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let payload = self.get_raw(key).await?;
        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(target = SOURCE, key, error = %err, "cached payload did not decode; ignoring");
                None
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(remote) = &self.remote
            && let Ok(true) = remote.exists(key).await
        {
            return true;
        }
        self.local.contains(key)
    }

    /// Remove `key` from both tiers. Remote failures are logged, not returned.
    pub async fn delete(&self, key: &str) {
        if let Some(remote) = &self.remote
            && let Err(err) = remote.delete(&[key.to_string()]).await
        {
            warn!(target = SOURCE, key, error = %err, "remote delete failed");
        }
        self.local.remove(key);
    }

    /// Delete every remote key matching a glob pattern.
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| CacheError::unavailable("delete_by_pattern"))?;
        let keys = remote
            .keys(pattern)
            .await
            .map_err(|err| remote_only_failure("delete_by_pattern", pattern, err))?;
        remote
            .delete(&keys)
            .await
            .map_err(|err| remote_only_failure("delete_by_pattern", pattern, err))
    }

    /// Atomic on the remote tier; best-effort on the local fallback.
    pub async fn increment(&self, key: &str, delta: i64) -> i64 {
        if let Some(remote) = &self.remote {
            match remote.increment(key, delta).await {
                Ok(value) => return value,
                Err(err) => {
                    counter!("marketplace_cache_fallback_total", "op" => "increment").increment(1);
                    warn!(target = SOURCE, key, error = %err, "remote increment failed; using local tier");
                }
            }
        }
        self.local.increment(key, delta, self.config.default_ttl)
    }

    pub async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| CacheError::unavailable("set_expiration"))?;
        remote
            .expire(key, ttl)
            .await
            .map_err(|err| remote_only_failure("set_expiration", key, err))
    }

    pub async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| CacheError::unavailable("ttl"))?;
        remote
            .ttl(key)
            .await
            .map_err(|err| remote_only_failure("ttl", key, err))
    }

    /// Clear both tiers. A remote failure is returned before the local tier is touched.
    pub async fn flush_all(&self) -> Result<(), CacheError> {
        if let Some(remote) = &self.remote {
            remote.flush().await?;
        }
        self.local.clear();
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let (remote_available, remote_info) = match &self.remote {
            Some(remote) => match remote.info().await {
                Ok(info) => (true, Some(info)),
                Err(_) => (false, None),
            },
            None => (false, None),
        };

        CacheStats {
            local_entries: self.local.len(),
            remote_configured: self.remote.is_some(),
            remote_available,
            remote_info,
        }
    }

    pub async fn health(&self) -> CacheHealth {
        let remote = match &self.remote {
            Some(remote) => remote.ping().await.is_ok(),
            None => false,
        };
        CacheHealth {
            remote,
            local: true,
        }
    }

    /// Drop expired local-tier entries, returning how many were removed.
    pub fn sweep_local(&self) -> usize {
        let removed = self.local.sweep_expired();
        gauge!("marketplace_cache_local_entries").set(self.local.len() as f64);
        removed
    }
}

/// Operations without a local equivalent report an unreachable remote the
/// same way as a missing one.
fn remote_only_failure(operation: &'static str, key: &str, err: CacheError) -> CacheError {
    counter!("marketplace_cache_fallback_total", "op" => operation).increment(1);
    warn!(target = SOURCE, operation, key, error = %err, "remote-only cache operation failed");
    CacheError::unavailable(operation)
}
