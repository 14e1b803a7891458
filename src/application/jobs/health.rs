//! Five-minute token status summary. Logs only.

use serde::Serialize;
use tracing::{info, warn};

use super::JobContext;
use crate::application::tokens::ExpiryInfo;
use crate::domain::types::TokenHealth;

const SOURCE: &str = "marketplace::jobs::health";

/// More tenants than this needing refresh at once is worth a log line.
const NEEDS_REFRESH_NOTICE: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub active: usize,
    pub needs_refresh: usize,
    pub refreshing: usize,
    pub failed: usize,
    pub expired: usize,
}

pub fn summarize_statuses(statuses: &[ExpiryInfo]) -> StatusCounts {
    let mut counts = StatusCounts {
        total: statuses.len(),
        ..StatusCounts::default()
    };
    for status in statuses {
        match status.health {
            TokenHealth::Active => counts.active += 1,
            TokenHealth::NeedsRefresh => counts.needs_refresh += 1,
            TokenHealth::Refreshing => counts.refreshing += 1,
            TokenHealth::Failed => counts.failed += 1,
            TokenHealth::Expired => counts.expired += 1,
        }
    }
    counts
}

pub async fn process_health_job(ctx: JobContext) {
    let statuses = match ctx.tokens.all_statuses().await {
        Ok(statuses) => statuses,
        Err(err) => {
            warn!(target = SOURCE, error = %err, "token health check failed");
            return;
        }
    };

    let counts = summarize_statuses(&statuses);
    info!(
        target = SOURCE,
        total = counts.total,
        active = counts.active,
        needs_refresh = counts.needs_refresh,
        failed = counts.failed,
        expired = counts.expired,
        "token health"
    );

    if counts.expired > 0 {
        warn!(target = SOURCE, expired = counts.expired, "tenants with expired credentials");
    }
    if counts.needs_refresh > NEEDS_REFRESH_NOTICE {
        info!(
            target = SOURCE,
            needs_refresh = counts.needs_refresh,
            "many tenants awaiting refresh"
        );
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::application::jobs::test_support::context;
    use crate::application::testing::{MemoryRepos, StubBroker};

    #[tokio::test]
    async fn counts_by_health() {
        let repos = MemoryRepos::new();
        let broker = StubBroker::new(Duration::hours(1));
        repos.insert_tenant("fresh", Duration::days(5));
        repos.insert_tenant("closing", Duration::hours(6));
        repos.insert_tenant("gone", -Duration::hours(1));
        let ctx = context(&repos, &broker);

        let statuses = ctx.tokens.all_statuses().await.expect("statuses");
        let counts = summarize_statuses(&statuses);

        assert_eq!(
            counts,
            StatusCounts {
                total: 3,
                active: 1,
                needs_refresh: 1,
                refreshing: 0,
                failed: 0,
                expired: 1,
            }
        );
        process_health_job(ctx).await;
    }
}
