use sqlx::{Postgres, postgres::PgArguments, query::QueryAs};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{EnsureLocationParams, LocationPatch, LocationsRepo, RepoError};
use crate::domain::entities::LocationRecord;

use super::{PostgresRepositories, map_sqlx_error};

const LOCATION_COLUMNS: &str = "id, tenant_id, external_id, access_token, business_name, \
    business_type, address, city, state, zip_code, country, phone, email, website, is_active, \
    created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct LocationRow {
    id: Uuid,
    tenant_id: Uuid,
    external_id: String,
    access_token: String,
    business_name: String,
    business_type: Option<String>,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
    country: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    website: Option<String>,
    is_active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<LocationRow> for LocationRecord {
    fn from(row: LocationRow) -> Self {
        LocationRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            external_id: row.external_id,
            access_token: row.access_token,
            business_name: row.business_name,
            business_type: row.business_type,
            address: row.address,
            city: row.city,
            state: row.state,
            zip_code: row.zip_code,
            country: row.country,
            phone: row.phone,
            email: row.email,
            website: row.website,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const INSERT_LOCATION: &str = "INSERT INTO locations (id, tenant_id, external_id, access_token, \
    business_name, business_type, address, city, state, zip_code, country, phone, email, website, \
    is_active, created_at, updated_at) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, TRUE, $15, $15)";

fn bind_location(
    sql: &str,
    params: EnsureLocationParams,
) -> QueryAs<'_, Postgres, LocationRow, PgArguments> {
    let fields = params.fields;
    sqlx::query_as::<_, LocationRow>(sql)
        .bind(Uuid::new_v4())
        .bind(params.tenant_id)
        .bind(params.external_id)
        .bind(params.access_token)
        .bind(fields.business_name)
        .bind(fields.business_type)
        .bind(fields.address)
        .bind(fields.city)
        .bind(fields.state)
        .bind(fields.zip_code)
        .bind(fields.country)
        .bind(fields.phone)
        .bind(fields.email)
        .bind(fields.website)
        .bind(OffsetDateTime::now_utc())
}

#[async_trait::async_trait]
impl LocationsRepo for PostgresRepositories {
    async fn find_active_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocationRecord>, RepoError> {
        let sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM locations \
             WHERE external_id = $1 AND is_active = TRUE AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, LocationRow>(&sql)
            .bind(external_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(LocationRecord::from))
    }

    async fn list_active_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<LocationRecord>, RepoError> {
        let sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM locations \
             WHERE tenant_id = $1 AND is_active = TRUE AND deleted_at IS NULL \
             ORDER BY business_name, external_id"
        );
        let rows = sqlx::query_as::<_, LocationRow>(&sql)
            .bind(tenant_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(LocationRecord::from).collect())
    }

    async fn ensure_location(
        &self,
        params: EnsureLocationParams,
    ) -> Result<LocationRecord, RepoError> {
        let external_id = params.external_id.clone();
        let insert_sql = format!(
            "{INSERT_LOCATION} ON CONFLICT (external_id) WHERE deleted_at IS NULL DO NOTHING \
             RETURNING {LOCATION_COLUMNS}"
        );
        let inserted = bind_location(&insert_sql, params)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        if let Some(row) = inserted {
            return Ok(row.into());
        }

        // lost the insert race or the row was already there; return the stored one
        let existing_sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM locations \
             WHERE external_id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, LocationRow>(&existing_sql)
            .bind(&external_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?;
        Ok(row.into())
    }

    async fn upsert_location(
        &self,
        params: EnsureLocationParams,
    ) -> Result<LocationRecord, RepoError> {
        let sql = format!(
            "{INSERT_LOCATION} ON CONFLICT (external_id) WHERE deleted_at IS NULL DO UPDATE SET \
                access_token = EXCLUDED.access_token, \
                business_name = EXCLUDED.business_name, \
                business_type = EXCLUDED.business_type, \
                address = EXCLUDED.address, \
                city = EXCLUDED.city, \
                state = EXCLUDED.state, \
                zip_code = EXCLUDED.zip_code, \
                country = EXCLUDED.country, \
                phone = EXCLUDED.phone, \
                email = EXCLUDED.email, \
                website = EXCLUDED.website, \
                updated_at = EXCLUDED.updated_at \
             RETURNING {LOCATION_COLUMNS}"
        );
        let row = bind_location(&sql, params)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update_location(
        &self,
        id: Uuid,
        patch: &LocationPatch,
    ) -> Result<LocationRecord, RepoError> {
        let sql = format!(
            "UPDATE locations SET \
                business_name = COALESCE($2, business_name), \
                business_type = COALESCE($3, business_type), \
                address = COALESCE($4, address), \
                city = COALESCE($5, city), \
                state = COALESCE($6, state), \
                zip_code = COALESCE($7, zip_code), \
                country = COALESCE($8, country), \
                phone = COALESCE($9, phone), \
                email = COALESCE($10, email), \
                website = COALESCE($11, website), \
                updated_at = $12 \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {LOCATION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LocationRow>(&sql)
            .bind(id)
            .bind(patch.business_name.as_deref())
            .bind(patch.business_type.as_deref())
            .bind(patch.address.as_deref())
            .bind(patch.city.as_deref())
            .bind(patch.state.as_deref())
            .bind(patch.zip_code.as_deref())
            .bind(patch.country.as_deref())
            .bind(patch.phone.as_deref())
            .bind(patch.email.as_deref())
            .bind(patch.website.as_deref())
            .bind(OffsetDateTime::now_utc())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }
}
