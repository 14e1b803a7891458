use sqlx::query;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ContactsRepo, CreateContactParams, RepoError};
use crate::domain::entities::ContactRecord;

use super::{PostgresRepositories, map_sqlx_error};

const CONTACT_COLUMNS: &str = "id, location_id, first_name, last_name, title, email, phone, \
    mobile, is_primary, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ContactRow {
    id: Uuid,
    location_id: Uuid,
    first_name: String,
    last_name: String,
    title: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    mobile: Option<String>,
    is_primary: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ContactRow> for ContactRecord {
    fn from(row: ContactRow) -> Self {
        ContactRecord {
            id: row.id,
            location_id: row.location_id,
            first_name: row.first_name,
            last_name: row.last_name,
            title: row.title,
            email: row.email,
            phone: row.phone,
            mobile: row.mobile,
            is_primary: row.is_primary,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl ContactsRepo for PostgresRepositories {
    async fn list_by_location(&self, location_id: Uuid) -> Result<Vec<ContactRecord>, RepoError> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts \
             WHERE location_id = $1 AND deleted_at IS NULL \
             ORDER BY is_primary DESC, last_name, first_name"
        );
        let rows = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(location_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ContactRecord::from).collect())
    }

    async fn create_contact(
        &self,
        params: CreateContactParams,
    ) -> Result<ContactRecord, RepoError> {
        let sql = format!(
            "INSERT INTO contacts (id, location_id, first_name, last_name, title, email, phone, \
                mobile, is_primary, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
             RETURNING {CONTACT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(params.location_id)
            .bind(params.first_name)
            .bind(params.last_name)
            .bind(params.title)
            .bind(params.email)
            .bind(params.phone)
            .bind(params.mobile)
            .bind(params.is_primary)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn ensure_contact(
        &self,
        params: CreateContactParams,
    ) -> Result<ContactRecord, RepoError> {
        if let Some(email) = params.email.as_deref() {
            let sql = format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts \
                 WHERE location_id = $1 AND email = $2 AND deleted_at IS NULL LIMIT 1"
            );
            let existing = sqlx::query_as::<_, ContactRow>(&sql)
                .bind(params.location_id)
                .bind(email)
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?;
            if let Some(row) = existing {
                return Ok(row.into());
            }
        }
        self.create_contact(params).await
    }

    async fn soft_delete_contact(&self, location_id: Uuid, id: Uuid) -> Result<bool, RepoError> {
        let result = query(
            "UPDATE contacts SET deleted_at = $3, updated_at = $3 \
             WHERE id = $1 AND location_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(location_id)
        .bind(OffsetDateTime::now_utc())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
