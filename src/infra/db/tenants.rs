use sqlx::query;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    RepoError, TenantsRepo, UpdateCredentialsParams, UpsertTenantParams,
};
use crate::domain::entities::TenantRecord;

use super::{PostgresRepositories, map_sqlx_error};

const TENANT_COLUMNS: &str = "id, external_id, name, access_token, refresh_token, token_expiry, \
    is_active, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    external_id: String,
    name: String,
    access_token: String,
    refresh_token: String,
    token_expiry: OffsetDateTime,
    is_active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TenantRow> for TenantRecord {
    fn from(row: TenantRow) -> Self {
        TenantRecord {
            id: row.id,
            external_id: row.external_id,
            name: row.name,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            token_expiry: row.token_expiry,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl TenantsRepo for PostgresRepositories {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TenantRecord>, RepoError> {
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE external_id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(external_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(TenantRecord::from))
    }

    async fn find_active_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TenantRecord>, RepoError> {
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants \
             WHERE external_id = $1 AND is_active = TRUE AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(external_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(TenantRecord::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TenantRecord>, RepoError> {
        let sql =
            format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(TenantRecord::from))
    }

    async fn list_active(&self) -> Result<Vec<TenantRecord>, RepoError> {
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants \
             WHERE is_active = TRUE AND deleted_at IS NULL ORDER BY external_id"
        );
        let rows = sqlx::query_as::<_, TenantRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(TenantRecord::from).collect())
    }

    async fn upsert_authorized(
        &self,
        params: UpsertTenantParams,
    ) -> Result<TenantRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let sql = format!(
            "INSERT INTO tenants (id, external_id, name, access_token, refresh_token, token_expiry, \
                is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7) \
             ON CONFLICT (external_id) WHERE deleted_at IS NULL DO UPDATE SET \
                name = EXCLUDED.name, \
                access_token = EXCLUDED.access_token, \
                refresh_token = EXCLUDED.refresh_token, \
                token_expiry = EXCLUDED.token_expiry, \
                is_active = TRUE, \
                updated_at = EXCLUDED.updated_at \
             RETURNING {TENANT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&params.external_id)
            .bind(&params.name)
            .bind(&params.access_token)
            .bind(&params.refresh_token)
            .bind(params.token_expiry)
            .bind(now)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update_credentials(
        &self,
        params: UpdateCredentialsParams,
    ) -> Result<TenantRecord, RepoError> {
        let sql = format!(
            "UPDATE tenants SET access_token = $2, refresh_token = $3, token_expiry = $4, \
                updated_at = $5 \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {TENANT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(params.id)
            .bind(&params.access_token)
            .bind(&params.refresh_token)
            .bind(params.token_expiry)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), RepoError> {
        let result = query("UPDATE tenants SET is_active = FALSE, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(OffsetDateTime::now_utc())
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
