//! Periodic maintenance jobs and their registration with the scheduler.

mod cleanup;
mod health;
mod monitor;
mod refresh;

use std::sync::Arc;

pub use cleanup::{process_cleanup_job, run_cleanup_now};
pub use health::{StatusCounts, process_health_job, summarize_statuses};
pub use monitor::{ExpiryReport, classify_expiry, process_monitor_job};
pub use refresh::{process_refresh_job, run_refresh_now};

use crate::application::tokens::TokenManager;
use crate::scheduler::{JobId, Scheduler, SchedulerError};

pub const REFRESH_JOB: &str = "token_refresh";
pub const CLEANUP_JOB: &str = "refresh_history_cleanup";
pub const HEALTH_JOB: &str = "token_health";
pub const MONITOR_JOB: &str = "token_expiry_monitor";

/// Shared state handed to every maintenance job.
#[derive(Clone)]
pub struct JobContext {
    pub tokens: Arc<TokenManager>,
    pub retention_days: u32,
}

/// Cron expressions for the maintenance jobs (six fields, seconds first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSchedules {
    pub refresh: String,
    pub cleanup: String,
    pub health: String,
    pub monitor: String,
}

impl Default for JobSchedules {
    fn default() -> Self {
        Self {
            refresh: "0 0 * * * *".to_string(),
            cleanup: "0 0 2 * * *".to_string(),
            health: "0 */5 * * * *".to_string(),
            monitor: "0 */30 * * * *".to_string(),
        }
    }
}

/// Register the four maintenance jobs.
pub fn register_maintenance_jobs(
    scheduler: &Scheduler,
    ctx: JobContext,
    schedules: &JobSchedules,
) -> Result<Vec<JobId>, SchedulerError> {
    let refresh_ctx = ctx.clone();
    let cleanup_ctx = ctx.clone();
    let health_ctx = ctx.clone();
    let monitor_ctx = ctx;

    Ok(vec![
        scheduler.add_job(REFRESH_JOB, &schedules.refresh, move || {
            process_refresh_job(refresh_ctx.clone())
        })?,
        scheduler.add_job(CLEANUP_JOB, &schedules.cleanup, move || {
            process_cleanup_job(cleanup_ctx.clone())
        })?,
        scheduler.add_job(HEALTH_JOB, &schedules.health, move || {
            process_health_job(health_ctx.clone())
        })?,
        scheduler.add_job(MONITOR_JOB, &schedules.monitor, move || {
            process_monitor_job(monitor_ctx.clone())
        })?,
    ])
}
