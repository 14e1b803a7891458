//! Cache configuration.
//!
//! Controls entry lifetimes for the two-tier cache via `marketplace.toml`.

use std::time::Duration;

const DEFAULT_TTL_MINUTES: u64 = 60;
const DEFAULT_ENTITY_TTL_MINUTES: u64 = 30;
const DEFAULT_LIST_TTL_MINUTES: u64 = 15;
const DEFAULT_LOCAL_SWEEP_SECONDS: u64 = 600;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of local-tier entries written without an explicit TTL (counters).
    pub default_ttl: Duration,
    /// Lifetime of single-record entries (tenant, location).
    pub entity_ttl: Duration,
    /// Lifetime of list entries (locations, contacts, products).
    pub list_ttl: Duration,
    /// Interval between sweeps of expired local-tier entries.
    pub local_sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_MINUTES * 60),
            entity_ttl: Duration::from_secs(DEFAULT_ENTITY_TTL_MINUTES * 60),
            list_ttl: Duration::from_secs(DEFAULT_LIST_TTL_MINUTES * 60),
            local_sweep_interval: Duration::from_secs(DEFAULT_LOCAL_SWEEP_SECONDS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl: settings.default_ttl,
            entity_ttl: settings.entity_ttl,
            list_ttl: settings.list_ttl,
            local_sweep_interval: settings.local_sweep_interval,
        }
    }
}
