//! Daily purge of terminal refresh history.

use tracing::{info, warn};

use super::JobContext;
use crate::application::tokens::TokenError;

/// Purge with the configured retention, or `retention_days` when given.
pub async fn run_cleanup_now(
    ctx: &JobContext,
    retention_days: Option<u32>,
) -> Result<u64, TokenError> {
    ctx.tokens
        .purge_old_records(retention_days.unwrap_or(ctx.retention_days))
        .await
}

pub async fn process_cleanup_job(ctx: JobContext) {
    match run_cleanup_now(&ctx, None).await {
        Ok(removed) if removed > 0 => {
            info!(target = "marketplace::jobs::cleanup", removed, "refresh history purged");
        }
        Ok(_) => {}
        Err(err) => {
            warn!(target = "marketplace::jobs::cleanup", error = %err, "refresh history purge failed");
        }
    }
}
