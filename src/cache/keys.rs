//! Cache key builders.
//!
//! Every key the business layer reads or invalidates is produced here so the
//! read path and the invalidation path cannot drift apart.

pub fn tenant(external_id: &str) -> String {
    format!("company:{external_id}")
}

pub fn location(external_id: &str) -> String {
    format!("location:{external_id}")
}

pub fn locations_by_tenant(tenant_external_id: &str) -> String {
    format!("locations:{tenant_external_id}")
}

pub fn contacts_by_location(location_external_id: &str) -> String {
    format!("contacts:{location_external_id}")
}

pub fn products_by_location(location_external_id: &str) -> String {
    format!("products:{location_external_id}")
}

pub fn rate_limit(client_id: &str) -> String {
    format!("rate_limit:{client_id}")
}
