//! Domain entities mirrored from persistent storage.
//!
//! Credential fields are skipped by serde so they never leave the process
//! through a cache payload or an API response. A record read back from the
//! cache therefore carries empty credentials; callers needing them go to the
//! store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::RefreshStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    #[serde(skip)]
    pub access_token: String,
    #[serde(skip)]
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub token_expiry: OffsetDateTime,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    #[serde(skip)]
    pub access_token: String,
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
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: Uuid,
    pub location_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub is_primary: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: f64,
    pub currency: String,
    pub sku: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Tracking row for a tenant's credential refresh history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub next_due: OffsetDateTime,
    pub refresh_count: i32,
    pub status: RefreshStatus,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_credentials_are_not_serialized() {
        let now = OffsetDateTime::now_utc();
        let tenant = TenantRecord {
            id: Uuid::new_v4(),
            external_id: "T1".into(),
            name: "Acme".into(),
            access_token: "access-secret".into(),
            refresh_token: "refresh-secret".into(),
            token_expiry: now,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&tenant).expect("serialize tenant");
        assert!(!json.contains("access-secret"));
        assert!(!json.contains("refresh-secret"));

        let restored: TenantRecord = serde_json::from_str(&json).expect("deserialize tenant");
        assert_eq!(restored.external_id, "T1");
        assert!(restored.access_token.is_empty());
    }
}
