use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    // stdout carries command output; logs go to stderr
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "marketplace_cache_hit_total",
            Unit::Count,
            "Cache reads answered, labelled by tier."
        );
        describe_counter!(
            "marketplace_cache_miss_total",
            Unit::Count,
            "Cache reads answered by neither tier."
        );
        describe_counter!(
            "marketplace_cache_fallback_total",
            Unit::Count,
            "Operations that fell back to the local tier after a remote failure."
        );
        describe_gauge!(
            "marketplace_cache_local_entries",
            Unit::Count,
            "Entries held by the local cache tier after the last sweep."
        );
        describe_counter!(
            "marketplace_token_refresh_total",
            Unit::Count,
            "Credential refresh attempts, labelled by outcome."
        );
        describe_histogram!(
            "marketplace_token_refresh_pass_ms",
            Unit::Milliseconds,
            "Duration of a full refresh pass over due records."
        );
        describe_counter!(
            "marketplace_scheduler_job_runs_total",
            Unit::Count,
            "Scheduled job executions, labelled by job."
        );
        describe_counter!(
            "marketplace_scheduler_job_panics_total",
            Unit::Count,
            "Scheduled job executions that panicked."
        );
        describe_counter!(
            "marketplace_background_failures_total",
            Unit::Count,
            "Background tasks that returned an error."
        );
    });
}
