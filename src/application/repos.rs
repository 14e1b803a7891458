//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    ContactRecord, LocationRecord, ProductRecord, RefreshRecord, TenantRecord,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct UpsertTenantParams {
    pub external_id: String,
    pub name: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct UpdateCredentialsParams {
    pub id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct ResetRefreshParams {
    pub tenant_id: Uuid,
    pub last_refresh: OffsetDateTime,
    pub next_due: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordRefreshSuccessParams {
    pub id: Uuid,
    pub refreshed_at: OffsetDateTime,
    pub next_due: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct LocationFields {
    pub business_name: String,
    pub business_type: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnsureLocationParams {
    pub tenant_id: Uuid,
    pub external_id: String,
    pub access_token: String,
    pub fields: LocationFields,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct LocationPatch {
    pub business_name: Option<String>,
    pub business_type: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

impl LocationPatch {
    pub fn is_empty(&self) -> bool {
        self.business_name.is_none()
            && self.business_type.is_none()
            && self.address.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip_code.is_none()
            && self.country.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.website.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CreateContactParams {
    pub location_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct CreateProductParams {
    pub location_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: f64,
    pub currency: String,
    pub sku: Option<String>,
}

#[async_trait]
pub trait TenantsRepo: Send + Sync {
    /// Any non-deleted tenant with this external identifier, active or not.
    async fn find_by_external_id(&self, external_id: &str)
    -> Result<Option<TenantRecord>, RepoError>;

    async fn find_active_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TenantRecord>, RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TenantRecord>, RepoError>;

    async fn list_active(&self) -> Result<Vec<TenantRecord>, RepoError>;

    /// Insert a tenant or replace the credentials of the existing row and reactivate it.
    async fn upsert_authorized(&self, params: UpsertTenantParams)
    -> Result<TenantRecord, RepoError>;

    async fn update_credentials(
        &self,
        params: UpdateCredentialsParams,
    ) -> Result<TenantRecord, RepoError>;

    async fn deactivate(&self, id: Uuid) -> Result<(), RepoError>;
}

#[async_trait]
pub trait RefreshRecordsRepo: Send + Sync {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<RefreshRecord>, RepoError>;

    /// Records with status `active` whose `next_due` is at or before `now`.
    async fn list_due(&self, now: OffsetDateTime) -> Result<Vec<RefreshRecord>, RepoError>;

    /// Create the tenant's record, or reset an existing one to a fresh `active` state.
    async fn reset_for_tenant(&self, params: ResetRefreshParams)
    -> Result<RefreshRecord, RepoError>;

    async fn record_success(
        &self,
        params: RecordRefreshSuccessParams,
    ) -> Result<RefreshRecord, RepoError>;

    async fn record_failure(&self, id: Uuid, message: &str) -> Result<RefreshRecord, RepoError>;

    async fn mark_expired(
        &self,
        tenant_id: Uuid,
        message: &str,
    ) -> Result<Option<RefreshRecord>, RepoError>;

    /// Delete `failed`/`expired` records last updated before `cutoff`.
    async fn purge_terminal(&self, cutoff: OffsetDateTime) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait LocationsRepo: Send + Sync {
    async fn find_active_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocationRecord>, RepoError>;

    async fn list_active_by_tenant(&self, tenant_id: Uuid)
    -> Result<Vec<LocationRecord>, RepoError>;

    /// Insert the location unless one with the same external id exists; the stored row wins.
    async fn ensure_location(
        &self,
        params: EnsureLocationParams,
    ) -> Result<LocationRecord, RepoError>;

    /// Insert the location, or overwrite the provider-owned fields and token
    /// of the stored row with the same external id.
    async fn upsert_location(
        &self,
        params: EnsureLocationParams,
    ) -> Result<LocationRecord, RepoError>;

    async fn update_location(
        &self,
        id: Uuid,
        patch: &LocationPatch,
    ) -> Result<LocationRecord, RepoError>;
}

#[async_trait]
pub trait ContactsRepo: Send + Sync {
    async fn list_by_location(&self, location_id: Uuid) -> Result<Vec<ContactRecord>, RepoError>;

    async fn create_contact(&self, params: CreateContactParams)
    -> Result<ContactRecord, RepoError>;

    /// Insert unless a contact with the same email already exists at the location.
    async fn ensure_contact(&self, params: CreateContactParams)
    -> Result<ContactRecord, RepoError>;

    /// Returns `false` when no live contact matched.
    async fn soft_delete_contact(&self, location_id: Uuid, id: Uuid) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait ProductsRepo: Send + Sync {
    async fn list_by_location(&self, location_id: Uuid) -> Result<Vec<ProductRecord>, RepoError>;

    async fn create_product(&self, params: CreateProductParams)
    -> Result<ProductRecord, RepoError>;

    /// Insert unless a product with the same SKU already exists at the location.
    async fn ensure_product(&self, params: CreateProductParams)
    -> Result<ProductRecord, RepoError>;

    async fn soft_delete_product(&self, location_id: Uuid, id: Uuid) -> Result<bool, RepoError>;
}
