//! Hourly credential refresh pass.

use tracing::{info, warn};

use super::JobContext;
use crate::application::tokens::{RefreshSummary, TokenError};

/// Run the refresh pass outside the schedule.
pub async fn run_refresh_now(ctx: &JobContext) -> Result<RefreshSummary, TokenError> {
    ctx.tokens.refresh_due_tokens().await
}

pub async fn process_refresh_job(ctx: JobContext) {
    match run_refresh_now(&ctx).await {
        Ok(summary) if summary.due > 0 => {
            info!(
                target = "marketplace::jobs::refresh",
                refreshed = summary.refreshed,
                failed = summary.failed,
                "scheduled refresh completed"
            );
        }
        Ok(_) => {}
        Err(err) => {
            warn!(target = "marketplace::jobs::refresh", error = %err, "scheduled refresh could not list due records");
        }
    }
}
