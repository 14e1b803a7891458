use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::debug;

use crate::cache::{CacheError, TwoTierCache, keys};
use crate::config::RateLimitSettings;

/// Fixed-window request counter keyed by client, stored in the shared cache.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<TwoTierCache>,
    window: Duration,
    max_requests: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new(cache: Arc<TwoTierCache>, window: Duration, max_requests: u32) -> Self {
        Self {
            cache,
            window,
            max_requests,
        }
    }

    pub fn from_settings(cache: Arc<TwoTierCache>, settings: &RateLimitSettings) -> Self {
        Self::new(cache, settings.window, settings.max_requests.get())
    }

    pub async fn check(&self, client: &str) -> RateDecision {
        let key = keys::rate_limit(client);
        let count = self.cache.increment(&key, 1).await;

        if count == 1 {
            match self.cache.set_expiration(&key, self.window).await {
                Ok(_) => {}
                // local counters expire with the cache default instead
                Err(CacheError::Unavailable { .. }) => {}
                Err(err) => debug!(target = "marketplace::rate_limit", key, error = %err, "failed to set window expiry"),
            }
        }

        let used = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
        let allowed = used <= self.max_requests;
        RateDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(used),
            retry_after_secs: if allowed { 0 } else { self.retry_after_secs() },
        }
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}
