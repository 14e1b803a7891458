use std::{process, sync::Arc};

use marketplace::{
    application::{
        background::BackgroundPool,
        broker::{DataProvider, TokenBroker},
        business::{BusinessRepos, BusinessService},
        error::{AppError, ErrorReport},
        jobs::{
            JobContext, register_maintenance_jobs, run_cleanup_now, run_refresh_now,
            summarize_statuses,
        },
        repos::{ContactsRepo, LocationsRepo, ProductsRepo, RefreshRecordsRepo, TenantsRepo},
        tokens::{TokenManager, TokenPolicy},
    },
    cache::{CacheConfig, RedisStore, RemoteStore, TwoTierCache},
    config,
    domain::{error::DomainError, types::external_id},
    infra::{broker::HttpBroker, db::PostgresRepositories, error::InfraError, telemetry},
    scheduler::Scheduler,
};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "marketplace::main";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error(SOURCE, error);
    if dispatcher::has_been_set() {
        error!(
            target = report.source,
            error = %error,
            chain = ?report.messages,
            "application error"
        );
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(target = SOURCE, error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CacheHealth => run_cache_health(settings).await,
        command => run_oneshot(settings, command).await,
    }
}

/// Everything a command needs, wired explicitly.
struct Services {
    tokens: Arc<TokenManager>,
    business: BusinessService,
    cache: Arc<TwoTierCache>,
    pool: BackgroundPool,
    jobs: JobContext,
}

async fn build_services(settings: &config::Settings) -> Result<Services, AppError> {
    let repositories = init_repositories(settings).await?;
    let cache = build_cache(settings).await;

    let broker = Arc::new(
        HttpBroker::new(
            settings.broker.base_url.as_str(),
            settings.broker.public_key.clone(),
            settings.broker.secret_key.clone(),
            settings.broker.timeout,
        )
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?,
    );
    let token_broker: Arc<dyn TokenBroker> = broker.clone();
    let provider: Arc<dyn DataProvider> = broker;

    let tenants_repo: Arc<dyn TenantsRepo> = repositories.clone();
    let refresh_repo: Arc<dyn RefreshRecordsRepo> = repositories.clone();
    let locations_repo: Arc<dyn LocationsRepo> = repositories.clone();
    let contacts_repo: Arc<dyn ContactsRepo> = repositories.clone();
    let products_repo: Arc<dyn ProductsRepo> = repositories;

    let tokens = Arc::new(TokenManager::new(
        tenants_repo.clone(),
        refresh_repo,
        token_broker,
        cache.clone(),
        TokenPolicy::from(&settings.tokens),
    ));

    let pool = BackgroundPool::new(settings.sync.concurrency.get());
    let business = BusinessService::new(
        BusinessRepos {
            tenants: tenants_repo,
            locations: locations_repo,
            contacts: contacts_repo,
            products: products_repo,
        },
        provider,
        cache.clone(),
        pool.clone(),
    );

    let jobs = JobContext {
        tokens: tokens.clone(),
        retention_days: settings.tokens.retention_days,
    };

    Ok(Services {
        tokens,
        business,
        cache,
        pool,
        jobs,
    })
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let repositories =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await?;
    Ok(Arc::new(repositories))
}

/// Connect the remote tier when configured; an unreachable Redis degrades to
/// the local tier instead of failing startup.
async fn build_cache(settings: &config::Settings) -> Arc<TwoTierCache> {
    let cache_config = CacheConfig::from(&settings.cache);

    let remote = match settings.redis.url.as_deref() {
        Some(url) => match RedisStore::connect(url, settings.redis.connect_timeout).await {
            Ok(store) => {
                info!(target = SOURCE, "remote cache tier connected");
                Some(Arc::new(store) as Arc<dyn RemoteStore>)
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    error = %err,
                    "remote cache tier unavailable, continuing with local tier only"
                );
                None
            }
        },
        None => {
            info!(target = SOURCE, "no remote cache configured, using local tier only");
            None
        }
    };

    Arc::new(TwoTierCache::new(remote, cache_config))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let services = build_services(&settings).await?;

    let scheduler = Scheduler::new(settings.scheduler.shutdown_timeout);
    let job_ids = register_maintenance_jobs(
        &scheduler,
        services.jobs.clone(),
        &settings.scheduler.schedules,
    )?;
    scheduler.start();
    info!(
        target = SOURCE,
        jobs = job_ids.len(),
        remote_cache = services.cache.has_remote(),
        "marketplace started"
    );

    let sweeper_cancel = CancellationToken::new();
    let sweeper = spawn_local_sweeper(services.cache.clone(), sweeper_cancel.clone());

    let signal = shutdown_signal().await;

    sweeper_cancel.cancel();
    if let Err(err) = sweeper.await {
        warn!(target = SOURCE, error = %err, "cache sweeper ended abnormally");
    }

    let clean = scheduler.stop().await;
    let drained = tokio::time::timeout(settings.scheduler.shutdown_timeout, services.pool.drain())
        .await
        .is_ok();
    if !drained {
        warn!(
            target = SOURCE,
            pending = services.pool.pending(),
            "background tasks still running at shutdown"
        );
    }
    info!(target = SOURCE, clean, "marketplace stopped");

    signal.map_err(AppError::from)
}

fn spawn_local_sweeper(cache: Arc<TwoTierCache>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = cache.config().local_sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let removed = cache.sweep_local();
                    if removed > 0 {
                        debug!(target = SOURCE, removed, "swept expired local cache entries");
                    }
                }
            }
        }
    })
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() -> Result<(), InfraError> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => {
                result?;
                info!(target = SOURCE, "received SIGINT, shutting down");
            }
            _ = terminate.recv() => {
                info!(target = SOURCE, "received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        info!(target = SOURCE, "received Ctrl-C, shutting down");
    }

    Ok(())
}

async fn run_cache_health(settings: config::Settings) -> Result<(), AppError> {
    let cache = build_cache(&settings).await;
    let health = cache.health().await;
    let stats = cache.stats().await;
    print_json(&json!({
        "healthy": health.is_healthy(),
        "health": health,
        "stats": stats,
    }))
}

async fn run_oneshot(settings: config::Settings, command: config::Command) -> Result<(), AppError> {
    let services = build_services(&settings).await?;

    match command {
        config::Command::Authorize(args) => {
            let code = args.code.trim();
            if code.is_empty() {
                return Err(DomainError::invalid("code", "must not be empty").into());
            }
            let tenant = services.tokens.authorize(code).await?;
            print_json(&tenant)
        }
        config::Command::RefreshDue => {
            let summary = run_refresh_now(&services.jobs).await?;
            print_json(&summary)
        }
        config::Command::Refresh(args) => {
            let tenant = external_id("tenant", &args.tenant)?;
            let refreshed = services.tokens.refresh_tenant(tenant).await?;
            print_json(&refreshed)
        }
        config::Command::Status(args) => match args.tenant.as_deref() {
            Some(tenant) => {
                let info = services
                    .tokens
                    .expiry_info(external_id("tenant", tenant)?)
                    .await?;
                print_json(&info)
            }
            None => {
                let statuses = services.tokens.all_statuses().await?;
                print_json(&json!({
                    "counts": summarize_statuses(&statuses),
                    "tenants": statuses,
                }))
            }
        },
        config::Command::MarkExpired(args) => {
            let tenant = external_id("tenant", &args.tenant)?;
            services.tokens.mark_expired(tenant).await?;
            print_json(&json!({ "tenant": tenant, "status": "expired" }))
        }
        config::Command::Purge(args) => {
            if args.retention_days == Some(0) {
                return Err(
                    DomainError::invalid("retention_days", "must be greater than zero").into(),
                );
            }
            let removed = run_cleanup_now(&services.jobs, args.retention_days).await?;
            print_json(&json!({ "removed": removed }))
        }
        config::Command::Sync(args) => {
            let tenant = external_id("tenant", &args.tenant)?;
            let locations = services.business.sync_tenant_data(tenant).await?;
            // the process exits after printing, so let queued location syncs finish
            services.pool.drain().await;
            print_json(&locations)
        }
        config::Command::Locations(args) => {
            let tenant = external_id("tenant", &args.tenant)?;
            let locations = services.business.locations_by_tenant(tenant).await?;
            print_json(&locations)
        }
        config::Command::Serve(_) | config::Command::CacheHealth => Err(AppError::unexpected(
            "command is not a one-shot operation",
        )),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
