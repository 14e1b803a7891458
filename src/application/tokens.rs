//! Credential lifecycle for authorized tenants.
//!
//! Each tenant carries a provider credential with a day-scale lifetime and a
//! refresh record tracking its history. Refresh becomes due a fixed lead
//! window before expiry; the scheduled pass retries failed attempts on its
//! next run without backoff.

use std::sync::Arc;

use dashmap::DashSet;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::broker::{BrokerError, TokenBroker};
use crate::application::repos::{
    RecordRefreshSuccessParams, RefreshRecordsRepo, RepoError, ResetRefreshParams, TenantsRepo,
    UpdateCredentialsParams, UpsertTenantParams,
};
use crate::cache::{TwoTierCache, keys};
use crate::domain::entities::{RefreshRecord, TenantRecord};
use crate::domain::types::{RefreshStatus, TokenHealth};

const SOURCE: &str = "marketplace::application::tokens";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("tenant `{0}` not found")]
    NotFound(String),
    #[error("credential for `{tenant}` is not due for refresh until {due}")]
    NotDue {
        tenant: String,
        due: OffsetDateTime,
    },
    #[error("a refresh for `{0}` is already in flight")]
    InFlight(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Time windows governing refresh and validity decisions.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    /// Refresh becomes due this long before expiry.
    pub lead_window: Duration,
    /// Synchronous validity checks reject credentials expiring within this margin.
    pub safety_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            lead_window: Duration::hours(24),
            safety_margin: Duration::hours(1),
        }
    }
}

impl From<&crate::config::TokenSettings> for TokenPolicy {
    fn from(settings: &crate::config::TokenSettings) -> Self {
        let whole = |value: std::time::Duration| {
            Duration::seconds(i64::try_from(value.as_secs()).unwrap_or(i64::MAX))
        };
        Self {
            lead_window: whole(settings.lead_window),
            safety_margin: whole(settings.safety_margin),
        }
    }
}

impl TokenPolicy {
    pub fn next_due(&self, expiry: OffsetDateTime) -> OffsetDateTime {
        expiry - self.lead_window
    }

    /// Usable while at least the safety margin remains.
    pub fn is_usable(&self, expiry: OffsetDateTime, now: OffsetDateTime) -> bool {
        expiry - now >= self.safety_margin
    }

    pub fn classify(&self, expiry: OffsetDateTime, now: OffsetDateTime) -> TokenHealth {
        if expiry <= now {
            TokenHealth::Expired
        } else if expiry - now <= self.lead_window {
            TokenHealth::NeedsRefresh
        } else {
            TokenHealth::Active
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshFailure {
    pub tenant_id: Uuid,
    pub external_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub due: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub failures: Vec<RefreshFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshedTenant {
    pub tenant: TenantRecord,
    pub record: RefreshRecord,
}

/// Point-in-time view of one tenant's credential.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryInfo {
    pub tenant_id: Uuid,
    pub external_id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Negative once the credential has expired.
    pub seconds_remaining: i64,
    pub is_expired: bool,
    pub needs_refresh: bool,
    pub health: TokenHealth,
    pub history: Option<RefreshHistory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshHistory {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub next_refresh: OffsetDateTime,
    pub refresh_count: i32,
    pub status: RefreshStatus,
    pub error_message: Option<String>,
}

impl From<&RefreshRecord> for RefreshHistory {
    fn from(record: &RefreshRecord) -> Self {
        Self {
            last_refresh: record.last_refresh,
            next_refresh: record.next_due,
            refresh_count: record.refresh_count,
            status: record.status,
            error_message: record.error_message.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TokenManager {
    tenants: Arc<dyn TenantsRepo>,
    refresh: Arc<dyn RefreshRecordsRepo>,
    broker: Arc<dyn TokenBroker>,
    cache: Arc<TwoTierCache>,
    policy: TokenPolicy,
    in_flight: Arc<DashSet<Uuid>>,
}

/// Marks a tenant as refreshing for as long as it is held.
struct InFlightGuard<'a> {
    set: &'a DashSet<Uuid>,
    tenant_id: Uuid,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a DashSet<Uuid>, tenant: &TenantRecord) -> Result<Self, TokenError> {
        if !set.insert(tenant.id) {
            return Err(TokenError::InFlight(tenant.external_id.clone()));
        }
        Ok(Self {
            set,
            tenant_id: tenant.id,
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.tenant_id);
    }
}

impl TokenManager {
    pub fn new(
        tenants: Arc<dyn TenantsRepo>,
        refresh: Arc<dyn RefreshRecordsRepo>,
        broker: Arc<dyn TokenBroker>,
        cache: Arc<TwoTierCache>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            tenants,
            refresh,
            broker,
            cache,
            policy,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Exchange an authorization code, then upsert the tenant and reset its
    /// refresh record.
    pub async fn authorize(&self, code: &str) -> Result<TenantRecord, TokenError> {
        let authorized = self.broker.exchange_code(code).await?;
        let now = OffsetDateTime::now_utc();

        let tenant = self
            .tenants
            .upsert_authorized(UpsertTenantParams {
                external_id: authorized.tenant_id,
                name: authorized.tenant_name,
                access_token: authorized.access_token,
                refresh_token: authorized.refresh_token,
                token_expiry: authorized.expires_at,
            })
            .await?;

        self.refresh
            .reset_for_tenant(ResetRefreshParams {
                tenant_id: tenant.id,
                last_refresh: now,
                next_due: self.policy.next_due(tenant.token_expiry),
            })
            .await?;

        self.cache.delete(&keys::tenant(&tenant.external_id)).await;
        info!(
            target = SOURCE,
            tenant = %tenant.external_id,
            expires_at = %tenant.token_expiry,
            "tenant authorized"
        );
        Ok(tenant)
    }

    /// Refresh every active record whose next-due time has passed.
    ///
    /// Failures are recorded per tenant and never abort the batch. Only a
    /// failure to list due records is returned.
    pub async fn refresh_due_tokens(&self) -> Result<RefreshSummary, TokenError> {
        let started = std::time::Instant::now();
        let due = self.refresh.list_due(OffsetDateTime::now_utc()).await?;
        let mut summary = RefreshSummary {
            due: due.len(),
            ..RefreshSummary::default()
        };

        for record in due {
            match self.refresh_record(record.clone()).await {
                Ok(refreshed) => {
                    summary.refreshed += 1;
                    info!(
                        target = SOURCE,
                        tenant = %refreshed.tenant.external_id,
                        count = refreshed.record.refresh_count,
                        "credential refreshed"
                    );
                }
                Err((external_id, err)) => {
                    summary.failed += 1;
                    warn!(
                        target = SOURCE,
                        tenant_id = %record.tenant_id,
                        error = %err,
                        "scheduled credential refresh failed"
                    );
                    summary.failures.push(RefreshFailure {
                        tenant_id: record.tenant_id,
                        external_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        histogram!("marketplace_token_refresh_pass_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            target = SOURCE,
            due = summary.due,
            refreshed = summary.refreshed,
            failed = summary.failed,
            "refresh pass finished"
        );
        Ok(summary)
    }

    async fn refresh_record(
        &self,
        record: RefreshRecord,
    ) -> Result<RefreshedTenant, (Option<String>, TokenError)> {
        let tenant = match self.tenants.find_by_id(record.tenant_id).await {
            Ok(Some(tenant)) if tenant.is_active => tenant,
            Ok(_) => {
                let message = "tenant missing or inactive";
                if let Err(err) = self.refresh.record_failure(record.id, message).await {
                    return Err((None, err.into()));
                }
                return Err((None, TokenError::NotFound(record.tenant_id.to_string())));
            }
            Err(err) => return Err((None, err.into())),
        };

        let external_id = tenant.external_id.clone();
        self.perform_refresh(tenant, Some(record))
            .await
            .map_err(|err| (Some(external_id), err))
    }

    /// On-demand refresh. Rejected with [`TokenError::NotDue`] while more than
    /// the lead window remains, without contacting the broker.
    pub async fn refresh_tenant(&self, external_id: &str) -> Result<RefreshedTenant, TokenError> {
        let tenant = self.active_tenant(external_id).await?;
        let now = OffsetDateTime::now_utc();
        if tenant.token_expiry - now > self.policy.lead_window {
            return Err(TokenError::NotDue {
                tenant: tenant.external_id,
                due: self.policy.next_due(tenant.token_expiry),
            });
        }

        let record = self.refresh.find_by_tenant(tenant.id).await?;
        self.perform_refresh(tenant, record).await
    }

    async fn perform_refresh(
        &self,
        tenant: TenantRecord,
        record: Option<RefreshRecord>,
    ) -> Result<RefreshedTenant, TokenError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, &tenant)?;

        let credentials = match self
            .broker
            .refresh(&tenant.refresh_token, &tenant.external_id)
            .await
        {
            Ok(credentials) => credentials,
            Err(err) => {
                counter!("marketplace_token_refresh_total", "outcome" => "failure").increment(1);
                if let Some(record) = &record {
                    self.refresh.record_failure(record.id, &err.to_string()).await?;
                }
                return Err(err.into());
            }
        };

        let now = OffsetDateTime::now_utc();
        let next_due = self.policy.next_due(credentials.expires_at);
        let tenant = self
            .tenants
            .update_credentials(UpdateCredentialsParams {
                id: tenant.id,
                access_token: credentials.access_token,
                refresh_token: credentials.refresh_token,
                token_expiry: credentials.expires_at,
            })
            .await?;

        let record_id = match record {
            Some(record) => record.id,
            None => {
                self.refresh
                    .reset_for_tenant(ResetRefreshParams {
                        tenant_id: tenant.id,
                        last_refresh: now,
                        next_due,
                    })
                    .await?
                    .id
            }
        };
        let record = self
            .refresh
            .record_success(RecordRefreshSuccessParams {
                id: record_id,
                refreshed_at: now,
                next_due,
            })
            .await?;

        self.cache.delete(&keys::tenant(&tenant.external_id)).await;
        counter!("marketplace_token_refresh_total", "outcome" => "success").increment(1);
        Ok(RefreshedTenant { tenant, record })
    }

    /// `false` when the credential has expired or has less than the safety
    /// margin left.
    pub async fn is_valid(&self, external_id: &str) -> Result<bool, TokenError> {
        let tenant = self.active_tenant(external_id).await?;
        Ok(self
            .policy
            .is_usable(tenant.token_expiry, OffsetDateTime::now_utc()))
    }

    pub async fn expiry_info(&self, external_id: &str) -> Result<ExpiryInfo, TokenError> {
        let tenant = self.active_tenant(external_id).await?;
        self.describe(tenant).await
    }

    /// Expiry info for every active tenant. Per-tenant lookup failures are
    /// logged and skipped.
    pub async fn all_statuses(&self) -> Result<Vec<ExpiryInfo>, TokenError> {
        let tenants = self.tenants.list_active().await?;
        let mut statuses = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let external_id = tenant.external_id.clone();
            match self.describe(tenant).await {
                Ok(info) => statuses.push(info),
                Err(err) => {
                    warn!(target = SOURCE, tenant = %external_id, error = %err, "skipping tenant status");
                }
            }
        }
        Ok(statuses)
    }

    async fn describe(&self, tenant: TenantRecord) -> Result<ExpiryInfo, TokenError> {
        let record = self.refresh.find_by_tenant(tenant.id).await?;
        let now = OffsetDateTime::now_utc();
        let classified = self.policy.classify(tenant.token_expiry, now);

        let health = if self.in_flight.contains(&tenant.id) {
            TokenHealth::Refreshing
        } else {
            match record.as_ref().map(|r| r.status) {
                Some(RefreshStatus::Expired) => TokenHealth::Expired,
                Some(RefreshStatus::Failed) if classified != TokenHealth::Expired => {
                    TokenHealth::Failed
                }
                _ => classified,
            }
        };

        Ok(ExpiryInfo {
            tenant_id: tenant.id,
            external_id: tenant.external_id,
            name: tenant.name,
            expires_at: tenant.token_expiry,
            seconds_remaining: (tenant.token_expiry - now).whole_seconds(),
            is_expired: classified == TokenHealth::Expired,
            needs_refresh: classified != TokenHealth::Active,
            health,
            history: record.as_ref().map(RefreshHistory::from),
        })
    }

    /// Deactivate the tenant and mark its refresh record `expired`. Terminal
    /// until the tenant is authorized again.
    pub async fn mark_expired(&self, external_id: &str) -> Result<(), TokenError> {
        let tenant = self
            .tenants
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| TokenError::NotFound(external_id.to_string()))?;

        self.tenants.deactivate(tenant.id).await?;
        self.refresh
            .mark_expired(tenant.id, "marked expired")
            .await?;
        self.cache.delete(&keys::tenant(&tenant.external_id)).await;

        warn!(target = SOURCE, tenant = %tenant.external_id, "tenant credential marked expired");
        Ok(())
    }

    /// Delete terminal refresh records untouched for `retention_days`.
    pub async fn purge_old_records(&self, retention_days: u32) -> Result<u64, TokenError> {
        let cutoff = OffsetDateTime::now_utc() - Duration::days(i64::from(retention_days));
        let removed = self.refresh.purge_terminal(cutoff).await?;
        info!(target = SOURCE, removed, retention_days, "purged refresh history");
        Ok(removed)
    }

    async fn active_tenant(&self, external_id: &str) -> Result<TenantRecord, TokenError> {
        self.tenants
            .find_active_by_external_id(external_id)
            .await?
            .ok_or_else(|| TokenError::NotFound(external_id.to_string()))
    }
}
