//! In-memory repository and collaborator doubles for application tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::broker::{
    AuthorizedTenant, BrokerError, DataProvider, ProviderContact, ProviderLocation,
    ProviderProduct, RefreshedCredentials, TokenBroker,
};
use crate::application::repos::{
    ContactsRepo, CreateContactParams, CreateProductParams, EnsureLocationParams, LocationFields,
    LocationPatch, LocationsRepo, ProductsRepo, RecordRefreshSuccessParams, RefreshRecordsRepo,
    RepoError, ResetRefreshParams, TenantsRepo, UpdateCredentialsParams, UpsertTenantParams,
};
use crate::domain::entities::{
    ContactRecord, LocationRecord, ProductRecord, RefreshRecord, TenantRecord,
};
use crate::domain::types::RefreshStatus;

#[derive(Default)]
struct Tables {
    tenants: Vec<TenantRecord>,
    refresh: Vec<RefreshRecord>,
    locations: Vec<LocationRecord>,
    contacts: Vec<(ContactRecord, bool)>,
    products: Vec<(ProductRecord, bool)>,
}

/// A store call that can be made to fail for chosen tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailingCall {
    RefreshLookup,
    CredentialUpdate,
}

/// A single in-memory store implementing every repository trait.
#[derive(Default)]
pub struct MemoryRepos {
    tables: Mutex<Tables>,
    location_reads: AtomicUsize,
    failures: Mutex<HashSet<(FailingCall, Uuid)>>,
}

impl MemoryRepos {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory repos lock")
    }

    pub fn insert_tenant(&self, external_id: &str, expires_in: time::Duration) -> TenantRecord {
        let now = OffsetDateTime::now_utc();
        let tenant = TenantRecord {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            name: format!("{external_id} Inc"),
            access_token: format!("{external_id}-access"),
            refresh_token: format!("{external_id}-refresh"),
            token_expiry: now + expires_in,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.tables().tenants.push(tenant.clone());
        tenant
    }

    pub fn insert_refresh(&self, tenant_id: Uuid, next_due: OffsetDateTime) -> RefreshRecord {
        let now = OffsetDateTime::now_utc();
        let record = RefreshRecord {
            id: Uuid::new_v4(),
            tenant_id,
            last_refresh: None,
            next_due,
            refresh_count: 0,
            status: RefreshStatus::Active,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.tables().refresh.push(record.clone());
        record
    }

    /// Overwrite status and `updated_at` to simulate aged history.
    pub fn age_refresh(&self, id: Uuid, status: RefreshStatus, updated_at: OffsetDateTime) {
        if let Some(record) = self.tables().refresh.iter_mut().find(|r| r.id == id) {
            record.status = status;
            record.updated_at = updated_at;
        }
    }

    pub fn tenant(&self, id: Uuid) -> Option<TenantRecord> {
        self.tables().tenants.iter().find(|t| t.id == id).cloned()
    }

    pub fn refresh_for(&self, tenant_id: Uuid) -> Option<RefreshRecord> {
        self.tables()
            .refresh
            .iter()
            .find(|r| r.tenant_id == tenant_id)
            .cloned()
    }

    pub fn refresh_count(&self) -> usize {
        self.tables().refresh.len()
    }

    pub fn location_count(&self) -> usize {
        self.tables().locations.len()
    }

    pub fn contact_count(&self) -> usize {
        self.tables().contacts.iter().filter(|(_, deleted)| !deleted).count()
    }

    pub fn product_count(&self) -> usize {
        self.tables().products.iter().filter(|(_, deleted)| !deleted).count()
    }

    /// Make `call` return [`RepoError::Timeout`] for `tenant_id` from now on.
    pub fn fail(&self, call: FailingCall, tenant_id: Uuid) {
        self.failures
            .lock()
            .expect("memory repos failures lock")
            .insert((call, tenant_id));
    }

    fn check(&self, call: FailingCall, tenant_id: Uuid) -> Result<(), RepoError> {
        if self
            .failures
            .lock()
            .expect("memory repos failures lock")
            .contains(&(call, tenant_id))
        {
            return Err(RepoError::Timeout);
        }
        Ok(())
    }

    pub fn location(&self, external_id: &str) -> Option<LocationRecord> {
        self.tables()
            .locations
            .iter()
            .find(|l| l.external_id == external_id)
            .cloned()
    }

    /// Number of location list/lookup queries served.
    pub fn location_reads(&self) -> usize {
        self.location_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantsRepo for MemoryRepos {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TenantRecord>, RepoError> {
        Ok(self
            .tables()
            .tenants
            .iter()
            .find(|t| t.external_id == external_id)
            .cloned())
    }

    async fn find_active_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TenantRecord>, RepoError> {
        Ok(self
            .tables()
            .tenants
            .iter()
            .find(|t| t.external_id == external_id && t.is_active)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TenantRecord>, RepoError> {
        Ok(self.tenant(id))
    }

    async fn list_active(&self) -> Result<Vec<TenantRecord>, RepoError> {
        Ok(self
            .tables()
            .tenants
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect())
    }

    async fn upsert_authorized(
        &self,
        params: UpsertTenantParams,
    ) -> Result<TenantRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let mut tables = self.tables();
        if let Some(existing) = tables
            .tenants
            .iter_mut()
            .find(|t| t.external_id == params.external_id)
        {
            existing.name = params.name;
            existing.access_token = params.access_token;
            existing.refresh_token = params.refresh_token;
            existing.token_expiry = params.token_expiry;
            existing.is_active = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let tenant = TenantRecord {
            id: Uuid::new_v4(),
            external_id: params.external_id,
            name: params.name,
            access_token: params.access_token,
            refresh_token: params.refresh_token,
            token_expiry: params.token_expiry,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.tenants.push(tenant.clone());
        Ok(tenant)
    }

    async fn update_credentials(
        &self,
        params: UpdateCredentialsParams,
    ) -> Result<TenantRecord, RepoError> {
        self.check(FailingCall::CredentialUpdate, params.id)?;
        let mut tables = self.tables();
        let tenant = tables
            .tenants
            .iter_mut()
            .find(|t| t.id == params.id)
            .ok_or(RepoError::NotFound)?;
        tenant.access_token = params.access_token;
        tenant.refresh_token = params.refresh_token;
        tenant.token_expiry = params.token_expiry;
        tenant.updated_at = OffsetDateTime::now_utc();
        Ok(tenant.clone())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), RepoError> {
        let mut tables = self.tables();
        let tenant = tables
            .tenants
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(RepoError::NotFound)?;
        tenant.is_active = false;
        Ok(())
    }
}

#[async_trait]
impl RefreshRecordsRepo for MemoryRepos {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<RefreshRecord>, RepoError> {
        self.check(FailingCall::RefreshLookup, tenant_id)?;
        Ok(self.refresh_for(tenant_id))
    }

    async fn list_due(&self, now: OffsetDateTime) -> Result<Vec<RefreshRecord>, RepoError> {
        Ok(self
            .tables()
            .refresh
            .iter()
            .filter(|r| r.status == RefreshStatus::Active && r.next_due <= now)
            .cloned()
            .collect())
    }

    async fn reset_for_tenant(
        &self,
        params: ResetRefreshParams,
    ) -> Result<RefreshRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let mut tables = self.tables();
        if let Some(existing) = tables
            .refresh
            .iter_mut()
            .find(|r| r.tenant_id == params.tenant_id)
        {
            existing.last_refresh = Some(params.last_refresh);
            existing.next_due = params.next_due;
            existing.refresh_count = 0;
            existing.status = RefreshStatus::Active;
            existing.error_message = None;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = RefreshRecord {
            id: Uuid::new_v4(),
            tenant_id: params.tenant_id,
            last_refresh: Some(params.last_refresh),
            next_due: params.next_due,
            refresh_count: 0,
            status: RefreshStatus::Active,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        tables.refresh.push(record.clone());
        Ok(record)
    }

    async fn record_success(
        &self,
        params: RecordRefreshSuccessParams,
    ) -> Result<RefreshRecord, RepoError> {
        let mut tables = self.tables();
        let record = tables
            .refresh
            .iter_mut()
            .find(|r| r.id == params.id)
            .ok_or(RepoError::NotFound)?;
        record.last_refresh = Some(params.refreshed_at);
        record.next_due = params.next_due;
        record.refresh_count += 1;
        record.status = RefreshStatus::Active;
        record.error_message = None;
        record.updated_at = params.refreshed_at;
        Ok(record.clone())
    }

    async fn record_failure(&self, id: Uuid, message: &str) -> Result<RefreshRecord, RepoError> {
        let mut tables = self.tables();
        let record = tables
            .refresh
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RepoError::NotFound)?;
        record.status = RefreshStatus::Failed;
        record.error_message = Some(message.to_string());
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn mark_expired(
        &self,
        tenant_id: Uuid,
        message: &str,
    ) -> Result<Option<RefreshRecord>, RepoError> {
        let mut tables = self.tables();
        let Some(record) = tables.refresh.iter_mut().find(|r| r.tenant_id == tenant_id) else {
            return Ok(None);
        };
        record.status = RefreshStatus::Expired;
        record.error_message = Some(message.to_string());
        record.updated_at = OffsetDateTime::now_utc();
        Ok(Some(record.clone()))
    }

    async fn purge_terminal(&self, cutoff: OffsetDateTime) -> Result<u64, RepoError> {
        let mut tables = self.tables();
        let before = tables.refresh.len();
        tables
            .refresh
            .retain(|r| !(r.status.is_terminal() && r.updated_at < cutoff));
        Ok((before - tables.refresh.len()) as u64)
    }
}

#[async_trait]
impl LocationsRepo for MemoryRepos {
    async fn find_active_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocationRecord>, RepoError> {
        self.location_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tables()
            .locations
            .iter()
            .find(|l| l.external_id == external_id && l.is_active)
            .cloned())
    }

    async fn list_active_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<LocationRecord>, RepoError> {
        self.location_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tables()
            .locations
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.is_active)
            .cloned()
            .collect())
    }

    async fn ensure_location(
        &self,
        params: EnsureLocationParams,
    ) -> Result<LocationRecord, RepoError> {
        let mut tables = self.tables();
        if let Some(existing) = tables
            .locations
            .iter()
            .find(|l| l.external_id == params.external_id)
        {
            return Ok(existing.clone());
        }

        let location = new_location(params);
        tables.locations.push(location.clone());
        Ok(location)
    }

    async fn upsert_location(
        &self,
        params: EnsureLocationParams,
    ) -> Result<LocationRecord, RepoError> {
        let mut tables = self.tables();
        let incoming = new_location(params);
        match tables
            .locations
            .iter_mut()
            .find(|l| l.external_id == incoming.external_id)
        {
            Some(existing) => {
                *existing = LocationRecord {
                    id: existing.id,
                    tenant_id: existing.tenant_id,
                    is_active: existing.is_active,
                    created_at: existing.created_at,
                    ..incoming
                };
                Ok(existing.clone())
            }
            None => {
                tables.locations.push(incoming.clone());
                Ok(incoming)
            }
        }
    }

    async fn update_location(
        &self,
        id: Uuid,
        patch: &LocationPatch,
    ) -> Result<LocationRecord, RepoError> {
        let mut tables = self.tables();
        let location = tables
            .locations
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(RepoError::NotFound)?;
        if let Some(name) = &patch.business_name {
            location.business_name = name.clone();
        }
        if let Some(phone) = &patch.phone {
            location.phone = Some(phone.clone());
        }
        if let Some(city) = &patch.city {
            location.city = Some(city.clone());
        }
        if let Some(email) = &patch.email {
            location.email = Some(email.clone());
        }
        location.updated_at = OffsetDateTime::now_utc();
        Ok(location.clone())
    }
}

fn new_location(params: EnsureLocationParams) -> LocationRecord {
    let now = OffsetDateTime::now_utc();
    let LocationFields {
        business_name,
        business_type,
        address,
        city,
        state,
        zip_code,
        country,
        phone,
        email,
        website,
    } = params.fields;
    LocationRecord {
        id: Uuid::new_v4(),
        tenant_id: params.tenant_id,
        external_id: params.external_id,
        access_token: params.access_token,
        business_name,
        business_type,
        address,
        city,
        state,
        zip_code,
        country,
        phone,
        email,
        website,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl ContactsRepo for MemoryRepos {
    async fn list_by_location(&self, location_id: Uuid) -> Result<Vec<ContactRecord>, RepoError> {
        Ok(self
            .tables()
            .contacts
            .iter()
            .filter(|(c, deleted)| c.location_id == location_id && !deleted)
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn create_contact(
        &self,
        params: CreateContactParams,
    ) -> Result<ContactRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let contact = ContactRecord {
            id: Uuid::new_v4(),
            location_id: params.location_id,
            first_name: params.first_name,
            last_name: params.last_name,
            title: params.title,
            email: params.email,
            phone: params.phone,
            mobile: params.mobile,
            is_primary: params.is_primary,
            created_at: now,
            updated_at: now,
        };
        self.tables().contacts.push((contact.clone(), false));
        Ok(contact)
    }

    async fn ensure_contact(
        &self,
        params: CreateContactParams,
    ) -> Result<ContactRecord, RepoError> {
        if let Some(email) = &params.email {
            let existing = self
                .tables()
                .contacts
                .iter()
                .find(|(c, deleted)| {
                    !deleted
                        && c.location_id == params.location_id
                        && c.email.as_ref() == Some(email)
                })
                .map(|(c, _)| c.clone());
            if let Some(existing) = existing {
                return Ok(existing);
            }
        }
        self.create_contact(params).await
    }

    async fn soft_delete_contact(&self, location_id: Uuid, id: Uuid) -> Result<bool, RepoError> {
        let mut tables = self.tables();
        match tables
            .contacts
            .iter_mut()
            .find(|(c, deleted)| c.id == id && c.location_id == location_id && !deleted)
        {
            Some((_, deleted)) => {
                *deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ProductsRepo for MemoryRepos {
    async fn list_by_location(&self, location_id: Uuid) -> Result<Vec<ProductRecord>, RepoError> {
        Ok(self
            .tables()
            .products
            .iter()
            .filter(|(p, deleted)| p.location_id == location_id && !deleted)
            .map(|(p, _)| p.clone())
            .collect())
    }

    async fn create_product(
        &self,
        params: CreateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let product = ProductRecord {
            id: Uuid::new_v4(),
            location_id: params.location_id,
            name: params.name,
            description: params.description,
            category: params.category,
            price: params.price,
            currency: params.currency,
            sku: params.sku,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.tables().products.push((product.clone(), false));
        Ok(product)
    }

    async fn ensure_product(
        &self,
        params: CreateProductParams,
    ) -> Result<ProductRecord, RepoError> {
        if let Some(sku) = &params.sku {
            let existing = self
                .tables()
                .products
                .iter()
                .find(|(p, deleted)| {
                    !deleted && p.location_id == params.location_id && p.sku.as_ref() == Some(sku)
                })
                .map(|(p, _)| p.clone());
            if let Some(existing) = existing {
                return Ok(existing);
            }
        }
        self.create_product(params).await
    }

    async fn soft_delete_product(&self, location_id: Uuid, id: Uuid) -> Result<bool, RepoError> {
        let mut tables = self.tables();
        match tables
            .products
            .iter_mut()
            .find(|(p, deleted)| p.id == id && p.location_id == location_id && !deleted)
        {
            Some((_, deleted)) => {
                *deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Broker double: refreshes succeed with a fixed lifetime unless the refresh
/// token is listed as failing.
pub struct StubBroker {
    lifetime: time::Duration,
    failing: Mutex<Vec<String>>,
    authorized: Mutex<Option<AuthorizedTenant>>,
    calls: AtomicUsize,
}

impl StubBroker {
    pub fn new(lifetime: time::Duration) -> Arc<Self> {
        Arc::new(Self {
            lifetime,
            failing: Mutex::new(Vec::new()),
            authorized: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_for(&self, refresh_token: &str) {
        self.failing
            .lock()
            .expect("stub broker lock")
            .push(refresh_token.to_string());
    }

    pub fn authorize_as(&self, tenant: AuthorizedTenant) {
        *self.authorized.lock().expect("stub broker lock") = Some(tenant);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenBroker for StubBroker {
    async fn exchange_code(&self, _code: &str) -> Result<AuthorizedTenant, BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.authorized
            .lock()
            .expect("stub broker lock")
            .clone()
            .ok_or(BrokerError::Status { status: 400 })
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        tenant_external_id: &str,
    ) -> Result<RefreshedCredentials, BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .lock()
            .expect("stub broker lock")
            .iter()
            .any(|token| token == refresh_token)
        {
            return Err(BrokerError::Status { status: 502 });
        }
        Ok(RefreshedCredentials {
            access_token: format!("{tenant_external_id}-access-next"),
            refresh_token: format!("{tenant_external_id}-refresh-next"),
            expires_at: OffsetDateTime::now_utc() + self.lifetime,
        })
    }
}

/// Provider double serving a fixed set of locations per tenant.
#[derive(Default)]
pub struct StubProvider {
    locations: Mutex<HashMap<String, Vec<ProviderLocation>>>,
    contacts: Mutex<HashMap<String, Vec<ProviderContact>>>,
    location_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_locations(&self, tenant_external_id: &str, count: usize) {
        let locations = (0..count)
            .map(|n| ProviderLocation {
                external_id: format!("{tenant_external_id}-loc-{n}"),
                access_token: format!("{tenant_external_id}-loc-{n}-token"),
                fields: LocationFields {
                    business_name: format!("Store {n}"),
                    city: Some("Springfield".into()),
                    ..LocationFields::default()
                },
            })
            .collect();
        self.locations
            .lock()
            .expect("stub provider lock")
            .insert(tenant_external_id.to_string(), locations);
    }

    /// Change a location upstream, as the provider would between syncs.
    pub fn rename_location(
        &self,
        tenant_external_id: &str,
        location_external_id: &str,
        name: &str,
    ) {
        if let Some(location) = self
            .locations
            .lock()
            .expect("stub provider lock")
            .get_mut(tenant_external_id)
            .and_then(|locations| {
                locations
                    .iter_mut()
                    .find(|l| l.external_id == location_external_id)
            })
        {
            location.fields.business_name = name.to_string();
            location.access_token = format!("{location_external_id}-token-rotated");
        }
    }

    pub fn with_contacts(&self, location_external_id: &str, contacts: Vec<ProviderContact>) {
        self.contacts
            .lock()
            .expect("stub provider lock")
            .insert(location_external_id.to_string(), contacts);
    }

    pub fn location_calls(&self) -> usize {
        self.location_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for StubProvider {
    async fn list_locations(
        &self,
        _access_token: &str,
        tenant_external_id: &str,
    ) -> Result<Vec<ProviderLocation>, BrokerError> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .locations
            .lock()
            .expect("stub provider lock")
            .get(tenant_external_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_contacts(
        &self,
        _location_token: &str,
        location_external_id: &str,
    ) -> Result<Vec<ProviderContact>, BrokerError> {
        Ok(self
            .contacts
            .lock()
            .expect("stub provider lock")
            .get(location_external_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_products(
        &self,
        _location_token: &str,
        _location_external_id: &str,
    ) -> Result<Vec<ProviderProduct>, BrokerError> {
        Err(BrokerError::Unimplemented {
            operation: "list_products",
        })
    }
}
