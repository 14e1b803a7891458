//! Read-through access to tenant business data.
//!
//! Lookups consult the cache, then the store. Location lists fall back to the
//! external provider only when the store has nothing for the tenant; once
//! populated the store is authoritative for reads. An explicit tenant sync is
//! the only path that lets provider data overwrite stored locations. Writes
//! invalidate the affected keys after the store write has committed.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::background::BackgroundPool;
use crate::application::broker::{BrokerError, DataProvider, ProviderLocation};
use crate::application::repos::{
    ContactsRepo, CreateContactParams, CreateProductParams, EnsureLocationParams, LocationPatch,
    LocationsRepo, ProductsRepo, RepoError, TenantsRepo,
};
use crate::cache::{TwoTierCache, keys};
use crate::domain::entities::{ContactRecord, LocationRecord, ProductRecord, TenantRecord};

const SOURCE: &str = "marketplace::application::business";
const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Error)]
pub enum BusinessError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("provider error: {0}")]
    Provider(BrokerError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("{operation} is not implemented")]
    Unimplemented { operation: &'static str },
}

impl BusinessError {
    fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<BrokerError> for BusinessError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unimplemented { operation } => Self::Unimplemented { operation },
            other => Self::Provider(other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl NewContact {
    fn validate(&self) -> Result<(), BusinessError> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(BusinessError::validation("contact name must not be empty"));
        }
        if let Some(email) = &self.email
            && !email.contains('@')
        {
            return Err(BusinessError::validation(format!(
                "`{email}` is not an email address"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

impl NewProduct {
    fn validate(&self) -> Result<(), BusinessError> {
        if self.name.trim().is_empty() {
            return Err(BusinessError::validation("product name must not be empty"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(BusinessError::validation(
                "product price must be a non-negative number",
            ));
        }
        if let Some(currency) = &self.currency
            && (currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(BusinessError::validation(format!(
                "`{currency}` is not a currency code"
            )));
        }
        Ok(())
    }
}

/// How provider locations meet rows already in the store.
#[derive(Debug, Clone, Copy)]
enum StoreMode {
    /// Bootstrap: an existing row is returned untouched.
    KeepStored,
    /// Sync: provider fields and location tokens replace the stored ones.
    Overwrite,
}

/// Store adapters the business service reads and writes.
#[derive(Clone)]
pub struct BusinessRepos {
    pub tenants: Arc<dyn TenantsRepo>,
    pub locations: Arc<dyn LocationsRepo>,
    pub contacts: Arc<dyn ContactsRepo>,
    pub products: Arc<dyn ProductsRepo>,
}

#[derive(Clone)]
pub struct BusinessService {
    repos: BusinessRepos,
    provider: Arc<dyn DataProvider>,
    cache: Arc<TwoTierCache>,
    pool: BackgroundPool,
}

impl BusinessService {
    pub fn new(
        repos: BusinessRepos,
        provider: Arc<dyn DataProvider>,
        cache: Arc<TwoTierCache>,
        pool: BackgroundPool,
    ) -> Self {
        Self {
            repos,
            provider,
            cache,
            pool,
        }
    }

    pub async fn get_tenant(&self, external_id: &str) -> Result<TenantRecord, BusinessError> {
        let key = keys::tenant(external_id);
        if let Some(tenant) = self.cache.get::<TenantRecord>(&key).await {
            return Ok(tenant);
        }

        let tenant = self.stored_tenant(external_id).await?;
        self.cache_entity(&key, &tenant).await;
        Ok(tenant)
    }

    pub async fn get_location(&self, external_id: &str) -> Result<LocationRecord, BusinessError> {
        let key = keys::location(external_id);
        if let Some(location) = self.cache.get::<LocationRecord>(&key).await {
            return Ok(location);
        }

        let location = self.stored_location(external_id).await?;
        self.cache_entity(&key, &location).await;
        Ok(location)
    }

    /// Active locations of a tenant, bootstrapped from the provider when the
    /// store has none.
    pub async fn locations_by_tenant(
        &self,
        tenant_external_id: &str,
    ) -> Result<Vec<LocationRecord>, BusinessError> {
        let key = keys::locations_by_tenant(tenant_external_id);
        if let Some(locations) = self.cache.get::<Vec<LocationRecord>>(&key).await {
            return Ok(locations);
        }

        let tenant = self.stored_tenant(tenant_external_id).await?;
        let mut locations = self.repos.locations.list_active_by_tenant(tenant.id).await?;
        if locations.is_empty() {
            let fetched = self
                .provider
                .list_locations(&tenant.access_token, &tenant.external_id)
                .await?;
            locations = self
                .store_locations(&tenant, fetched, StoreMode::KeepStored)
                .await?;
            info!(
                target = SOURCE,
                tenant = %tenant.external_id,
                count = locations.len(),
                "bootstrapped locations from provider"
            );
        }

        self.cache_list(&key, &locations).await;
        Ok(locations)
    }

    pub async fn contacts_by_location(
        &self,
        location_external_id: &str,
    ) -> Result<Vec<ContactRecord>, BusinessError> {
        let key = keys::contacts_by_location(location_external_id);
        if let Some(contacts) = self.cache.get::<Vec<ContactRecord>>(&key).await {
            return Ok(contacts);
        }

        let location = self.stored_location(location_external_id).await?;
        let contacts = self.repos.contacts.list_by_location(location.id).await?;
        self.cache_list(&key, &contacts).await;
        Ok(contacts)
    }

    pub async fn products_by_location(
        &self,
        location_external_id: &str,
    ) -> Result<Vec<ProductRecord>, BusinessError> {
        let key = keys::products_by_location(location_external_id);
        if let Some(products) = self.cache.get::<Vec<ProductRecord>>(&key).await {
            return Ok(products);
        }

        let location = self.stored_location(location_external_id).await?;
        let products = self.repos.products.list_by_location(location.id).await?;
        self.cache_list(&key, &products).await;
        Ok(products)
    }

    pub async fn create_contact(
        &self,
        location_external_id: &str,
        contact: NewContact,
    ) -> Result<ContactRecord, BusinessError> {
        contact.validate()?;
        let location = self.stored_location(location_external_id).await?;

        let created = self
            .repos
            .contacts
            .create_contact(contact_params(location.id, contact))
            .await?;

        self.cache
            .delete(&keys::contacts_by_location(location_external_id))
            .await;
        Ok(created)
    }

    pub async fn create_product(
        &self,
        location_external_id: &str,
        product: NewProduct,
    ) -> Result<ProductRecord, BusinessError> {
        product.validate()?;
        let location = self.stored_location(location_external_id).await?;

        let created = self
            .repos
            .products
            .create_product(CreateProductParams {
                location_id: location.id,
                name: product.name,
                description: product.description,
                category: product.category,
                price: product.price,
                currency: product
                    .currency
                    .map(|c| c.to_ascii_uppercase())
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                sku: product.sku,
            })
            .await?;

        self.cache
            .delete(&keys::products_by_location(location_external_id))
            .await;
        Ok(created)
    }

    pub async fn update_location(
        &self,
        location_external_id: &str,
        patch: LocationPatch,
    ) -> Result<LocationRecord, BusinessError> {
        if patch.is_empty() {
            return Err(BusinessError::validation("location update has no fields"));
        }
        if patch
            .business_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(BusinessError::validation("business name must not be empty"));
        }

        let location = self.stored_location(location_external_id).await?;
        let updated = self
            .repos
            .locations
            .update_location(location.id, &patch)
            .await?;

        self.cache.delete(&keys::location(location_external_id)).await;
        if let Some(tenant) = self.repos.tenants.find_by_id(updated.tenant_id).await? {
            self.cache
                .delete(&keys::locations_by_tenant(&tenant.external_id))
                .await;
        }
        Ok(updated)
    }

    pub async fn delete_contact(
        &self,
        location_external_id: &str,
        contact_id: Uuid,
    ) -> Result<(), BusinessError> {
        let location = self.stored_location(location_external_id).await?;
        if !self
            .repos
            .contacts
            .soft_delete_contact(location.id, contact_id)
            .await?
        {
            return Err(BusinessError::not_found("contact", contact_id.to_string()));
        }

        self.cache
            .delete(&keys::contacts_by_location(location_external_id))
            .await;
        Ok(())
    }

    pub async fn delete_product(
        &self,
        location_external_id: &str,
        product_id: Uuid,
    ) -> Result<(), BusinessError> {
        let location = self.stored_location(location_external_id).await?;
        if !self
            .repos
            .products
            .soft_delete_product(location.id, product_id)
            .await?
        {
            return Err(BusinessError::not_found("product", product_id.to_string()));
        }

        self.cache
            .delete(&keys::products_by_location(location_external_id))
            .await;
        Ok(())
    }

    /// Force-fetch the tenant's locations from the provider, overwrite the
    /// stored copies and refresh the list cache. Contacts and products are
    /// pulled per location on the background pool; their failures are logged,
    /// never returned.
    pub async fn sync_tenant_data(
        &self,
        tenant_external_id: &str,
    ) -> Result<Vec<LocationRecord>, BusinessError> {
        let tenant = self.stored_tenant(tenant_external_id).await?;
        let fetched = self
            .provider
            .list_locations(&tenant.access_token, &tenant.external_id)
            .await?;
        let locations = self
            .store_locations(&tenant, fetched, StoreMode::Overwrite)
            .await?;

        self.cache_list(&keys::locations_by_tenant(tenant_external_id), &locations)
            .await;

        for location in &locations {
            let service = self.clone();
            let location = location.clone();
            self.pool
                .spawn("location_sync", async move { service.sync_location(location).await });
        }

        info!(
            target = SOURCE,
            tenant = %tenant.external_id,
            locations = locations.len(),
            "tenant sync dispatched"
        );
        Ok(locations)
    }

    async fn sync_location(&self, location: LocationRecord) -> Result<(), BusinessError> {
        match self
            .provider
            .list_contacts(&location.access_token, &location.external_id)
            .await
        {
            Ok(contacts) => {
                for contact in contacts {
                    let params = CreateContactParams {
                        location_id: location.id,
                        first_name: contact.first_name,
                        last_name: contact.last_name,
                        title: contact.title,
                        email: contact.email,
                        phone: contact.phone,
                        mobile: contact.mobile,
                        is_primary: contact.is_primary,
                    };
                    self.repos.contacts.ensure_contact(params).await?;
                }
                self.cache
                    .delete(&keys::contacts_by_location(&location.external_id))
                    .await;
            }
            Err(BrokerError::Unimplemented { operation }) => {
                debug!(target = SOURCE, location = %location.external_id, operation, "skipping contact sync");
            }
            Err(err) => return Err(err.into()),
        }

        match self
            .provider
            .list_products(&location.access_token, &location.external_id)
            .await
        {
            Ok(products) => {
                for product in products {
                    let params = CreateProductParams {
                        location_id: location.id,
                        name: product.name,
                        description: product.description,
                        category: product.category,
                        price: product.price,
                        currency: product
                            .currency
                            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                        sku: product.sku,
                    };
                    self.repos.products.ensure_product(params).await?;
                }
                self.cache
                    .delete(&keys::products_by_location(&location.external_id))
                    .await;
            }
            Err(BrokerError::Unimplemented { operation }) => {
                debug!(target = SOURCE, location = %location.external_id, operation, "skipping product sync");
            }
            Err(err) => return Err(err.into()),
        }

        Ok(())
    }

    async fn store_locations(
        &self,
        tenant: &TenantRecord,
        fetched: Vec<ProviderLocation>,
        mode: StoreMode,
    ) -> Result<Vec<LocationRecord>, BusinessError> {
        let mut locations = Vec::with_capacity(fetched.len());
        for location in fetched {
            let params = EnsureLocationParams {
                tenant_id: tenant.id,
                external_id: location.external_id,
                access_token: location.access_token,
                fields: location.fields,
            };
            let stored = match mode {
                StoreMode::KeepStored => self.repos.locations.ensure_location(params).await?,
                StoreMode::Overwrite => self.repos.locations.upsert_location(params).await?,
            };
            self.cache.delete(&keys::location(&stored.external_id)).await;
            locations.push(stored);
        }
        Ok(locations)
    }

    /// Tenant straight from the store; credentials are not cached.
    async fn stored_tenant(&self, external_id: &str) -> Result<TenantRecord, BusinessError> {
        self.repos
            .tenants
            .find_active_by_external_id(external_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("tenant", external_id))
    }

    async fn stored_location(&self, external_id: &str) -> Result<LocationRecord, BusinessError> {
        self.repos
            .locations
            .find_active_by_external_id(external_id)
            .await?
            .ok_or_else(|| BusinessError::not_found("location", external_id))
    }

    async fn cache_entity<T: serde::Serialize>(&self, key: &str, value: &T) {
        let ttl = self.cache.config().entity_ttl;
        if let Err(err) = self.cache.set(key, value, ttl).await {
            debug!(target = SOURCE, key, error = %err, "skipping cache fill");
        }
    }

    async fn cache_list<T: serde::Serialize>(&self, key: &str, values: &[T]) {
        let ttl = self.cache.config().list_ttl;
        if let Err(err) = self.cache.set(key, values, ttl).await {
            debug!(target = SOURCE, key, error = %err, "skipping cache fill");
        }
    }
}

fn contact_params(location_id: Uuid, contact: NewContact) -> CreateContactParams {
    CreateContactParams {
        location_id,
        first_name: contact.first_name,
        last_name: contact.last_name,
        title: contact.title,
        email: contact.email,
        phone: contact.phone,
        mobile: contact.mobile,
        is_primary: contact.is_primary,
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::application::broker::ProviderContact;
    use crate::application::testing::{MemoryRepos, StubProvider};
    use crate::cache::CacheConfig;

    fn service(repos: &Arc<MemoryRepos>, provider: &Arc<StubProvider>) -> BusinessService {
        BusinessService::new(
            BusinessRepos {
                tenants: repos.clone(),
                locations: repos.clone(),
                contacts: repos.clone(),
                products: repos.clone(),
            },
            provider.clone(),
            Arc::new(TwoTierCache::local_only(CacheConfig::default())),
            BackgroundPool::new(2),
        )
    }

    fn contact(first: &str, email: Option<&str>) -> NewContact {
        NewContact {
            first_name: first.into(),
            last_name: "Doe".into(),
            title: None,
            email: email.map(str::to_string),
            phone: None,
            mobile: None,
            is_primary: false,
        }
    }

    #[tokio::test]
    async fn empty_store_bootstraps_locations_once() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);
        repos.insert_tenant("T2", Duration::days(10));
        provider.with_locations("T2", 3);

        let first = business.locations_by_tenant("T2").await.expect("locations");
        assert_eq!(first.len(), 3);
        assert_eq!(repos.location_count(), 3);
        assert_eq!(provider.location_calls(), 1);

        let reads = repos.location_reads();
        let second = business.locations_by_tenant("T2").await.expect("cached");
        let ids = |locations: &[LocationRecord]| {
            locations.iter().map(|l| l.id).collect::<Vec<_>>()
        };
        assert_eq!(ids(&second), ids(&first));
        assert_eq!(repos.location_reads(), reads);
        assert_eq!(provider.location_calls(), 1);
    }

    #[tokio::test]
    async fn populated_store_is_not_overridden_by_provider() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);
        repos.insert_tenant("T3", Duration::days(10));
        provider.with_locations("T3", 1);
        business.locations_by_tenant("T3").await.expect("bootstrap");

        provider.with_locations("T3", 5);
        business.cache.flush_all().await.expect("flush");
        let locations = business.locations_by_tenant("T3").await.expect("store");

        assert_eq!(locations.len(), 1);
        assert_eq!(provider.location_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_tenant_is_not_found() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);

        assert!(matches!(
            business.get_tenant("nobody").await,
            Err(BusinessError::NotFound { entity: "tenant", .. })
        ));
    }

    #[tokio::test]
    async fn created_contact_is_visible_after_cached_read() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);
        repos.insert_tenant("T4", Duration::days(10));
        provider.with_locations("T4", 1);
        business.locations_by_tenant("T4").await.expect("bootstrap");

        assert!(business.contacts_by_location("T4-loc-0").await.expect("empty").is_empty());
        business
            .create_contact("T4-loc-0", contact("Jane", Some("jane@example.com")))
            .await
            .expect("create");

        let contacts = business.contacts_by_location("T4-loc-0").await.expect("list");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].first_name, "Jane");
    }

    #[tokio::test]
    async fn creation_validates_input_and_parent() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);

        assert!(matches!(
            business.create_contact("missing", contact("", None)).await,
            Err(BusinessError::Validation(_))
        ));
        assert!(matches!(
            business.create_contact("missing", contact("Ann", Some("nope"))).await,
            Err(BusinessError::Validation(_))
        ));
        assert!(matches!(
            business.create_contact("missing", contact("Ann", None)).await,
            Err(BusinessError::NotFound { entity: "location", .. })
        ));

        let product = NewProduct {
            name: "Widget".into(),
            description: None,
            category: None,
            price: -1.0,
            currency: None,
            sku: None,
        };
        assert!(matches!(
            business.create_product("missing", product).await,
            Err(BusinessError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn product_currency_defaults_and_delete_invalidates() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);
        repos.insert_tenant("T5", Duration::days(10));
        provider.with_locations("T5", 1);
        business.locations_by_tenant("T5").await.expect("bootstrap");

        let product = business
            .create_product(
                "T5-loc-0",
                NewProduct {
                    name: "Widget".into(),
                    description: None,
                    category: None,
                    price: 9.5,
                    currency: None,
                    sku: Some("W-1".into()),
                },
            )
            .await
            .expect("create");
        assert_eq!(product.currency, "USD");
        assert_eq!(business.products_by_location("T5-loc-0").await.expect("list").len(), 1);

        business
            .delete_product("T5-loc-0", product.id)
            .await
            .expect("delete");
        assert!(business.products_by_location("T5-loc-0").await.expect("list").is_empty());
        assert!(matches!(
            business.delete_product("T5-loc-0", product.id).await,
            Err(BusinessError::NotFound { entity: "product", .. })
        ));
    }

    #[tokio::test]
    async fn update_location_invalidates_single_and_list_keys() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);
        repos.insert_tenant("T6", Duration::days(10));
        provider.with_locations("T6", 1);
        business.locations_by_tenant("T6").await.expect("bootstrap");
        business.get_location("T6-loc-0").await.expect("warm cache");

        business
            .update_location(
                "T6-loc-0",
                LocationPatch {
                    business_name: Some("Renamed".into()),
                    ..LocationPatch::default()
                },
            )
            .await
            .expect("update");

        assert_eq!(
            business.get_location("T6-loc-0").await.expect("location").business_name,
            "Renamed"
        );
        assert_eq!(
            business.locations_by_tenant("T6").await.expect("list")[0].business_name,
            "Renamed"
        );
        assert!(matches!(
            business.update_location("T6-loc-0", LocationPatch::default()).await,
            Err(BusinessError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn sync_pulls_contacts_in_background() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);
        repos.insert_tenant("T7", Duration::days(10));
        provider.with_locations("T7", 2);
        provider.with_contacts(
            "T7-loc-0",
            vec![ProviderContact {
                first_name: "Sam".into(),
                last_name: "Lee".into(),
                email: Some("sam@example.com".into()),
                ..ProviderContact::default()
            }],
        );

        let locations = business.sync_tenant_data("T7").await.expect("sync");
        assert_eq!(locations.len(), 2);
        business.pool.drain().await;

        assert_eq!(repos.contact_count(), 1);
        assert_eq!(repos.product_count(), 0);

        business.sync_tenant_data("T7").await.expect("second sync");
        business.pool.drain().await;
        assert_eq!(repos.contact_count(), 1);
        assert_eq!(repos.location_count(), 2);
    }

    #[tokio::test]
    async fn sync_overwrites_stored_locations_with_provider_data() {
        let repos = MemoryRepos::new();
        let provider = StubProvider::new();
        let business = service(&repos, &provider);
        repos.insert_tenant("T9", Duration::days(10));
        provider.with_locations("T9", 1);
        let bootstrapped = business.locations_by_tenant("T9").await.expect("bootstrap");
        business.get_location("T9-loc-0").await.expect("warm cache");

        provider.rename_location("T9", "T9-loc-0", "Renamed Upstream");
        let synced = business.sync_tenant_data("T9").await.expect("sync");
        business.pool.drain().await;

        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].id, bootstrapped[0].id);
        assert_eq!(synced[0].business_name, "Renamed Upstream");
        assert_eq!(
            repos.location("T9-loc-0").expect("stored").access_token,
            "T9-loc-0-token-rotated"
        );
        assert_eq!(
            business.locations_by_tenant("T9").await.expect("cached list")[0].business_name,
            "Renamed Upstream"
        );
        assert_eq!(
            business.get_location("T9-loc-0").await.expect("location").business_name,
            "Renamed Upstream"
        );
        assert_eq!(repos.location_count(), 1);
    }

    #[test]
    fn unimplemented_provider_calls_stay_explicit() {
        let err = BusinessError::from(BrokerError::Unimplemented {
            operation: "list_products",
        });
        assert!(matches!(
            err,
            BusinessError::Unimplemented {
                operation: "list_products"
            }
        ));
    }
}
