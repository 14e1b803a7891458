use sqlx::query;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    RecordRefreshSuccessParams, RefreshRecordsRepo, RepoError, ResetRefreshParams,
};
use crate::domain::entities::RefreshRecord;
use crate::domain::types::RefreshStatus;

use super::{PostgresRepositories, map_sqlx_error};

const REFRESH_COLUMNS: &str = "id, tenant_id, last_refresh, next_due, refresh_count, status, \
    error_message, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct RefreshRow {
    id: Uuid,
    tenant_id: Uuid,
    last_refresh: Option<OffsetDateTime>,
    next_due: OffsetDateTime,
    refresh_count: i32,
    status: RefreshStatus,
    error_message: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<RefreshRow> for RefreshRecord {
    fn from(row: RefreshRow) -> Self {
        RefreshRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            last_refresh: row.last_refresh,
            next_due: row.next_due,
            refresh_count: row.refresh_count,
            status: row.status,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl RefreshRecordsRepo for PostgresRepositories {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<RefreshRecord>, RepoError> {
        let sql = format!("SELECT {REFRESH_COLUMNS} FROM refresh_records WHERE tenant_id = $1");
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(tenant_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(RefreshRecord::from))
    }

    async fn list_due(&self, now: OffsetDateTime) -> Result<Vec<RefreshRecord>, RepoError> {
        let sql = format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_records \
             WHERE status = $1 AND next_due <= $2 ORDER BY next_due"
        );
        let rows = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(RefreshStatus::Active)
            .bind(now)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(RefreshRecord::from).collect())
    }

    async fn reset_for_tenant(
        &self,
        params: ResetRefreshParams,
    ) -> Result<RefreshRecord, RepoError> {
        let sql = format!(
            "INSERT INTO refresh_records (id, tenant_id, last_refresh, next_due, refresh_count, \
                status, error_message, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 0, $5, NULL, $6, $6) \
             ON CONFLICT (tenant_id) DO UPDATE SET \
                last_refresh = EXCLUDED.last_refresh, \
                next_due = EXCLUDED.next_due, \
                refresh_count = 0, \
                status = EXCLUDED.status, \
                error_message = NULL, \
                updated_at = EXCLUDED.updated_at \
             RETURNING {REFRESH_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(params.tenant_id)
            .bind(params.last_refresh)
            .bind(params.next_due)
            .bind(RefreshStatus::Active)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn record_success(
        &self,
        params: RecordRefreshSuccessParams,
    ) -> Result<RefreshRecord, RepoError> {
        let sql = format!(
            "UPDATE refresh_records SET last_refresh = $2, next_due = $3, \
                refresh_count = refresh_count + 1, status = $4, error_message = NULL, \
                updated_at = $2 \
             WHERE id = $1 \
             RETURNING {REFRESH_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(params.id)
            .bind(params.refreshed_at)
            .bind(params.next_due)
            .bind(RefreshStatus::Active)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn record_failure(&self, id: Uuid, message: &str) -> Result<RefreshRecord, RepoError> {
        let sql = format!(
            "UPDATE refresh_records SET status = $2, error_message = $3, updated_at = $4 \
             WHERE id = $1 \
             RETURNING {REFRESH_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(id)
            .bind(RefreshStatus::Failed)
            .bind(message)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn mark_expired(
        &self,
        tenant_id: Uuid,
        message: &str,
    ) -> Result<Option<RefreshRecord>, RepoError> {
        let sql = format!(
            "UPDATE refresh_records SET status = $2, error_message = $3, updated_at = $4 \
             WHERE tenant_id = $1 \
             RETURNING {REFRESH_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(tenant_id)
            .bind(RefreshStatus::Expired)
            .bind(message)
            .bind(OffsetDateTime::now_utc())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(RefreshRecord::from))
    }

    async fn purge_terminal(&self, cutoff: OffsetDateTime) -> Result<u64, RepoError> {
        let result = query(
            "DELETE FROM refresh_records WHERE status IN ($1, $2) AND updated_at < $3",
        )
        .bind(RefreshStatus::Failed)
        .bind(RefreshStatus::Expired)
        .bind(cutoff)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
