use sqlx::query;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{CreateProductParams, ProductsRepo, RepoError};
use crate::domain::entities::ProductRecord;

use super::{PostgresRepositories, map_sqlx_error};

const PRODUCT_COLUMNS: &str = "id, location_id, name, description, category, price, currency, \
    sku, is_active, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    location_id: Uuid,
    name: String,
    description: Option<String>,
    category: Option<String>,
    price: f64,
    currency: String,
    sku: Option<String>,
    is_active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ProductRow> for ProductRecord {
    fn from(row: ProductRow) -> Self {
        ProductRecord {
            id: row.id,
            location_id: row.location_id,
            name: row.name,
            description: row.description,
            category: row.category,
            price: row.price,
            currency: row.currency,
            sku: row.sku,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl ProductsRepo for PostgresRepositories {
    async fn list_by_location(&self, location_id: Uuid) -> Result<Vec<ProductRecord>, RepoError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE location_id = $1 AND is_active = TRUE AND deleted_at IS NULL \
             ORDER BY name"
        );
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(location_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ProductRecord::from).collect())
    }

    async fn create_product(
        &self,
        params: CreateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        let sql = format!(
            "INSERT INTO products (id, location_id, name, description, category, price, currency, \
                sku, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $9) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(params.location_id)
            .bind(params.name)
            .bind(params.description)
            .bind(params.category)
            .bind(params.price)
            .bind(params.currency)
            .bind(params.sku)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn ensure_product(
        &self,
        params: CreateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        if let Some(sku) = params.sku.as_deref() {
            let sql = format!(
                "SELECT {PRODUCT_COLUMNS} FROM products \
                 WHERE location_id = $1 AND sku = $2 AND deleted_at IS NULL LIMIT 1"
            );
            let existing = sqlx::query_as::<_, ProductRow>(&sql)
                .bind(params.location_id)
                .bind(sku)
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?;
            if let Some(row) = existing {
                return Ok(row.into());
            }
        }
        self.create_product(params).await
    }

    async fn soft_delete_product(&self, location_id: Uuid, id: Uuid) -> Result<bool, RepoError> {
        let result = query(
            "UPDATE products SET deleted_at = $3, updated_at = $3 \
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
