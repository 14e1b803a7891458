//! Thirty-minute expiry monitor. Classifies each tenant by time to expiry
//! and logs the ones that need attention; never mutates state.

use serde::Serialize;
use time::Duration;
use tracing::{error, warn};

use super::JobContext;
use crate::application::tokens::ExpiryInfo;
use crate::domain::types::ExpiryAlert;

const SOURCE: &str = "marketplace::jobs::monitor";
const CRITICAL_WITHIN: Duration = Duration::hours(24);
const WARNING_WITHIN: Duration = Duration::hours(48);

pub fn classify_expiry(info: &ExpiryInfo) -> Option<ExpiryAlert> {
    let remaining = Duration::seconds(info.seconds_remaining);
    if info.is_expired || remaining < CRITICAL_WITHIN {
        Some(ExpiryAlert::Critical)
    } else if remaining < WARNING_WITHIN {
        Some(ExpiryAlert::Warning)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpiryReport {
    pub critical: Vec<String>,
    pub warning: Vec<String>,
}

impl ExpiryReport {
    pub fn from_statuses(statuses: &[ExpiryInfo]) -> Self {
        let mut report = Self::default();
        for info in statuses {
            match classify_expiry(info) {
                Some(ExpiryAlert::Critical) => report.critical.push(info.external_id.clone()),
                Some(ExpiryAlert::Warning) => report.warning.push(info.external_id.clone()),
                None => {}
            }
        }
        report
    }
}

pub async fn process_monitor_job(ctx: JobContext) {
    let statuses = match ctx.tokens.all_statuses().await {
        Ok(statuses) => statuses,
        Err(err) => {
            warn!(target = SOURCE, error = %err, "expiry monitor failed");
            return;
        }
    };

    for info in &statuses {
        match classify_expiry(info) {
            Some(ExpiryAlert::Critical) => error!(
                target = SOURCE,
                tenant = %info.external_id,
                seconds_remaining = info.seconds_remaining,
                "credential critical"
            ),
            Some(ExpiryAlert::Warning) => warn!(
                target = SOURCE,
                tenant = %info.external_id,
                seconds_remaining = info.seconds_remaining,
                "credential expiring soon"
            ),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::jobs::test_support::context;
    use crate::application::testing::{MemoryRepos, StubBroker};

    #[tokio::test]
    async fn report_splits_critical_and_warning() {
        let repos = MemoryRepos::new();
        let broker = StubBroker::new(Duration::hours(1));
        repos.insert_tenant("expired", -Duration::minutes(1));
        repos.insert_tenant("day", Duration::hours(20));
        repos.insert_tenant("two-days", Duration::hours(30));
        repos.insert_tenant("week", Duration::days(7));
        let ctx = context(&repos, &broker);

        let statuses = ctx.tokens.all_statuses().await.expect("statuses");
        let mut report = ExpiryReport::from_statuses(&statuses);
        report.critical.sort();

        assert_eq!(report.critical, vec!["day".to_string(), "expired".to_string()]);
        assert_eq!(report.warning, vec!["two-days".to_string()]);
        process_monitor_job(ctx).await;
    }
}
