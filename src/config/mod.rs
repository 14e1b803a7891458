//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::jobs::JobSchedules;
use crate::scheduler::parse_schedule;

mod cli;

pub use cli::{
    AuthorizeArgs, CliArgs, Command, GlobalOverrides, PurgeArgs, ServeArgs, StatusArgs, TenantArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "marketplace";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_REDIS_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BROKER_BASE_URL: &str = "https://api.nango.dev";
const DEFAULT_BROKER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_MINUTES: u64 = 60;
const DEFAULT_CACHE_ENTITY_TTL_MINUTES: u64 = 30;
const DEFAULT_CACHE_LIST_TTL_MINUTES: u64 = 15;
const DEFAULT_CACHE_LOCAL_SWEEP_SECS: u64 = 600;
const DEFAULT_TOKEN_LEAD_WINDOW_HOURS: u64 = 24;
const DEFAULT_TOKEN_SAFETY_MARGIN_MINUTES: u64 = 60;
const DEFAULT_TOKEN_RETENTION_DAYS: u32 = 30;
const DEFAULT_SCHEDULER_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 100;
const DEFAULT_SYNC_CONCURRENCY: u64 = 4;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub broker: BrokerSettings,
    pub cache: CacheSettings,
    pub tokens: TokenSettings,
    pub scheduler: SchedulerSettings,
    pub rate_limit: RateLimitSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Local tier only when absent.
    pub url: Option<String>,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub base_url: Url,
    pub public_key: String,
    pub secret_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub entity_ttl: Duration,
    pub list_ttl: Duration,
    pub local_sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub lead_window: Duration,
    pub safety_margin: Duration,
    pub retention_days: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub schedules: JobSchedules,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("MARKETPLACE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.overrides);
    if let Some(Command::Serve(args)) = cli.command.as_ref() {
        raw.apply_serve_overrides(args);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    redis: RawRedisSettings,
    broker: RawBrokerSettings,
    cache: RawCacheSettings,
    tokens: RawTokenSettings,
    scheduler: RawSchedulerSettings,
    rate_limit: RawRateLimitSettings,
    sync: RawSyncSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeArgs) {
        if let Some(seconds) = overrides.scheduler_shutdown_timeout_seconds {
            self.scheduler.shutdown_timeout_seconds = Some(seconds);
        }
        if let Some(count) = overrides.sync_concurrency {
            self.sync.concurrency = Some(count);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            redis,
            broker,
            cache,
            tokens,
            scheduler,
            rate_limit,
            sync,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            redis: build_redis_settings(redis)?,
            broker: build_broker_settings(broker)?,
            cache: build_cache_settings(cache)?,
            tokens: build_token_settings(tokens)?,
            scheduler: build_scheduler_settings(scheduler)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            sync: build_sync_settings(sync)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections,
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let timeout_secs = positive(
        redis
            .connect_timeout_seconds
            .unwrap_or(DEFAULT_REDIS_CONNECT_TIMEOUT_SECS),
        "redis.connect_timeout_seconds",
    )?;

    Ok(RedisSettings {
        url: non_blank(redis.url),
        connect_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_broker_settings(broker: RawBrokerSettings) -> Result<BrokerSettings, LoadError> {
    let raw_url = broker
        .base_url
        .unwrap_or_else(|| DEFAULT_BROKER_BASE_URL.to_string());
    let base_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("broker.base_url", format!("invalid URL: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "broker.base_url",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = positive(
        broker.timeout_seconds.unwrap_or(DEFAULT_BROKER_TIMEOUT_SECS),
        "broker.timeout_seconds",
    )?;

    Ok(BrokerSettings {
        base_url,
        public_key: broker.public_key.unwrap_or_default(),
        secret_key: broker.secret_key.unwrap_or_default(),
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let minutes = |value: Option<u64>, default: u64, key: &'static str| {
        positive(value.unwrap_or(default), key).map(|m| Duration::from_secs(m * 60))
    };

    Ok(CacheSettings {
        default_ttl: minutes(
            cache.default_ttl_minutes,
            DEFAULT_CACHE_TTL_MINUTES,
            "cache.default_ttl_minutes",
        )?,
        entity_ttl: minutes(
            cache.entity_ttl_minutes,
            DEFAULT_CACHE_ENTITY_TTL_MINUTES,
            "cache.entity_ttl_minutes",
        )?,
        list_ttl: minutes(
            cache.list_ttl_minutes,
            DEFAULT_CACHE_LIST_TTL_MINUTES,
            "cache.list_ttl_minutes",
        )?,
        local_sweep_interval: Duration::from_secs(positive(
            cache
                .local_sweep_seconds
                .unwrap_or(DEFAULT_CACHE_LOCAL_SWEEP_SECS),
            "cache.local_sweep_seconds",
        )?),
    })
}

fn build_token_settings(tokens: RawTokenSettings) -> Result<TokenSettings, LoadError> {
    let lead_hours = positive(
        tokens
            .lead_window_hours
            .unwrap_or(DEFAULT_TOKEN_LEAD_WINDOW_HOURS),
        "tokens.lead_window_hours",
    )?;
    let margin_minutes = tokens
        .safety_margin_minutes
        .unwrap_or(DEFAULT_TOKEN_SAFETY_MARGIN_MINUTES);
    let retention_days = tokens
        .retention_days
        .unwrap_or(DEFAULT_TOKEN_RETENTION_DAYS);
    if retention_days == 0 {
        return Err(LoadError::invalid(
            "tokens.retention_days",
            "must be greater than zero",
        ));
    }

    Ok(TokenSettings {
        lead_window: Duration::from_secs(lead_hours * 3600),
        safety_margin: Duration::from_secs(margin_minutes * 60),
        retention_days,
    })
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let defaults = JobSchedules::default();
    let schedules = JobSchedules {
        refresh: cron_expression(
            scheduler.refresh_cron,
            defaults.refresh,
            "scheduler.refresh_cron",
        )?,
        cleanup: cron_expression(
            scheduler.cleanup_cron,
            defaults.cleanup,
            "scheduler.cleanup_cron",
        )?,
        health: cron_expression(
            scheduler.health_cron,
            defaults.health,
            "scheduler.health_cron",
        )?,
        monitor: cron_expression(
            scheduler.monitor_cron,
            defaults.monitor,
            "scheduler.monitor_cron",
        )?,
    };

    let timeout_secs = positive(
        scheduler
            .shutdown_timeout_seconds
            .unwrap_or(DEFAULT_SCHEDULER_SHUTDOWN_TIMEOUT_SECS),
        "scheduler.shutdown_timeout_seconds",
    )?;

    Ok(SchedulerSettings {
        schedules,
        shutdown_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds = positive(
        rate_limit
            .window_seconds
            .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        "rate_limit.window_seconds",
    )?;
    let max_requests = non_zero_u32(
        rate_limit
            .max_requests
            .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS),
        "rate_limit.max_requests",
    )?;

    Ok(RateLimitSettings {
        window: Duration::from_secs(window_seconds),
        max_requests,
    })
}

fn build_sync_settings(sync: RawSyncSettings) -> Result<SyncSettings, LoadError> {
    let value = sync.concurrency.unwrap_or(DEFAULT_SYNC_CONCURRENCY);
    let concurrency = usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("sync.concurrency", "must be greater than zero"))?;

    Ok(SyncSettings { concurrency })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    connect_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrokerSettings {
    base_url: Option<String>,
    public_key: Option<String>,
    secret_key: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_minutes: Option<u64>,
    entity_ttl_minutes: Option<u64>,
    list_ttl_minutes: Option<u64>,
    local_sweep_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTokenSettings {
    lead_window_hours: Option<u64>,
    safety_margin_minutes: Option<u64>,
    retention_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    refresh_cron: Option<String>,
    cleanup_cron: Option<String>,
    health_cron: Option<String>,
    monitor_cron: Option<String>,
    shutdown_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSyncSettings {
    concurrency: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn cron_expression(
    value: Option<String>,
    default: String,
    key: &'static str,
) -> Result<String, LoadError> {
    let expression = non_blank(value).unwrap_or(default);
    parse_schedule(&expression).map_err(|err| LoadError::invalid(key, err.to_string()))?;
    Ok(expression)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
