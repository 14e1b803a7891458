use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the marketplace binary.
#[derive(Debug, Parser)]
#[command(
    name = "marketplace",
    version,
    about = "Marketplace backend: tenant credentials, cached business data and scheduled maintenance"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "MARKETPLACE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the scheduler and cache sweeper until interrupted.
    Serve(ServeArgs),
    /// Exchange an authorization code and register the tenant.
    Authorize(AuthorizeArgs),
    /// Refresh every credential whose refresh is due.
    #[command(name = "refresh-due")]
    RefreshDue,
    /// Refresh one tenant's credential now.
    Refresh(TenantArgs),
    /// Show credential status for one tenant or all of them.
    Status(StatusArgs),
    /// Mark a tenant's refresh record as expired.
    #[command(name = "mark-expired")]
    MarkExpired(TenantArgs),
    /// Delete old failed and expired refresh records.
    Purge(PurgeArgs),
    /// Queue a background sync of a tenant's locations.
    Sync(TenantArgs),
    /// List a tenant's locations.
    Locations(TenantArgs),
    /// Report the health of both cache tiers.
    #[command(name = "cache-health")]
    CacheHealth,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    /// Override how long shutdown waits for running jobs.
    #[arg(long = "scheduler-shutdown-timeout-seconds", value_name = "SECONDS")]
    pub scheduler_shutdown_timeout_seconds: Option<u64>,

    /// Override the background sync worker count.
    #[arg(long = "sync-concurrency", value_name = "COUNT")]
    pub sync_concurrency: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct AuthorizeArgs {
    /// Authorization code issued by the broker.
    #[arg(long, value_name = "CODE")]
    pub code: String,
}

#[derive(Debug, Args, Clone)]
pub struct TenantArgs {
    /// External tenant identifier.
    #[arg(value_name = "TENANT")]
    pub tenant: String,
}

#[derive(Debug, Args, Clone)]
pub struct StatusArgs {
    /// External tenant identifier; all tenants when omitted.
    #[arg(value_name = "TENANT")]
    pub tenant: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PurgeArgs {
    /// Keep records younger than this many days.
    #[arg(long = "retention-days", value_name = "DAYS")]
    pub retention_days: Option<u32>,
}
