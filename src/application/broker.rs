//! Contracts for the external token broker and business-data provider.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::repos::LocationFields;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Transport(String),
    #[error("broker responded with status {status}")]
    Status { status: u16 },
    #[error("failed to decode broker response: {0}")]
    Decode(String),
    #[error("{operation} is not implemented by the provider")]
    Unimplemented { operation: &'static str },
}

impl BrokerError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Credentials and tenant identity returned by a successful code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedTenant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(rename = "expires_at", with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(rename = "company_id")]
    pub tenant_id: String,
    #[serde(rename = "company_name")]
    pub tenant_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedCredentials {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ProviderLocation {
    pub external_id: String,
    pub access_token: String,
    pub fields: LocationFields,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderContact {
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderProduct {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: f64,
    pub currency: Option<String>,
    pub sku: Option<String>,
}

#[async_trait]
pub trait TokenBroker: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<AuthorizedTenant, BrokerError>;

    async fn refresh(
        &self,
        refresh_token: &str,
        tenant_external_id: &str,
    ) -> Result<RefreshedCredentials, BrokerError>;
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn list_locations(
        &self,
        access_token: &str,
        tenant_external_id: &str,
    ) -> Result<Vec<ProviderLocation>, BrokerError>;

    async fn list_contacts(
        &self,
        location_token: &str,
        location_external_id: &str,
    ) -> Result<Vec<ProviderContact>, BrokerError>;

    async fn list_products(
        &self,
        location_token: &str,
        location_external_id: &str,
    ) -> Result<Vec<ProviderProduct>, BrokerError>;
}
