//! HTTP client for the hosted token broker and its provider proxy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::application::broker::{
    AuthorizedTenant, BrokerError, DataProvider, ProviderContact, ProviderLocation,
    ProviderProduct, RefreshedCredentials, TokenBroker,
};
use crate::application::repos::LocationFields;

const SOURCE: &str = "marketplace::infra::broker";

#[derive(Clone, Debug)]
pub struct HttpBroker {
    client: Client,
    base: Url,
    public_key: String,
    secret_key: String,
}

#[derive(Serialize)]
struct CodeExchangeRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    company_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    location_id: String,
    location_token: String,
    business_name: String,
    #[serde(default)]
    business_type: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    zip_code: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    website: String,
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl From<LocationResponse> for ProviderLocation {
    fn from(response: LocationResponse) -> Self {
        ProviderLocation {
            external_id: response.location_id,
            access_token: response.location_token,
            fields: LocationFields {
                business_name: response.business_name,
                business_type: non_empty(response.business_type),
                address: non_empty(response.address),
                city: non_empty(response.city),
                state: non_empty(response.state),
                zip_code: non_empty(response.zip_code),
                country: non_empty(response.country),
                phone: non_empty(response.phone),
                email: non_empty(response.email),
                website: non_empty(response.website),
            },
        }
    }
}

impl HttpBroker {
    pub fn new(
        base_url: &str,
        public_key: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let mut base = Url::parse(base_url).map_err(BrokerError::transport)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(BrokerError::transport)?;

        Ok(Self {
            client,
            base,
            public_key: public_key.into(),
            secret_key: secret_key.into(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("marketplace/", env!("CARGO_PKG_VERSION"))
    }

    fn url(&self, path: &str) -> Result<Url, BrokerError> {
        self.base.join(path).map_err(BrokerError::transport)
    }

    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        bearer: Option<&str>,
    ) -> Result<T, BrokerError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path)?;
        debug!(target = SOURCE, %method, %url, "broker request");

        let mut req = self.client.request(method, url);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(BrokerError::transport)?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(BrokerError::Status {
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await.map_err(BrokerError::transport)?;
        serde_json::from_slice(&bytes).map_err(BrokerError::decode)
    }
}

#[async_trait]
impl TokenBroker for HttpBroker {
    async fn exchange_code(&self, code: &str) -> Result<AuthorizedTenant, BrokerError> {
        let body = CodeExchangeRequest {
            code,
            client_id: &self.public_key,
            client_secret: &self.secret_key,
            grant_type: "authorization_code",
        };
        self.request(Method::POST, "oauth/token", Some(&body), None)
            .await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        tenant_external_id: &str,
    ) -> Result<RefreshedCredentials, BrokerError> {
        let body = RefreshRequest {
            refresh_token,
            company_id: tenant_external_id,
        };
        self.request(Method::POST, "oauth/refresh", Some(&body), None)
            .await
    }
}

#[async_trait]
impl DataProvider for HttpBroker {
    async fn list_locations(
        &self,
        access_token: &str,
        tenant_external_id: &str,
    ) -> Result<Vec<ProviderLocation>, BrokerError> {
        let path = format!("api/v2/companies/{tenant_external_id}/locations");
        let locations: Vec<LocationResponse> = self
            .request::<_, ()>(Method::GET, &path, None, Some(access_token))
            .await?;
        Ok(locations.into_iter().map(ProviderLocation::from).collect())
    }

    // The provider proxy exposes no contact or product listing yet.
    async fn list_contacts(
        &self,
        _location_token: &str,
        _location_external_id: &str,
    ) -> Result<Vec<ProviderContact>, BrokerError> {
        Err(BrokerError::Unimplemented {
            operation: "list_contacts",
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_under_base_prefix() {
        let broker = HttpBroker::new(
            "https://broker.example.com/v1",
            "pk",
            "sk",
            Duration::from_secs(5),
        )
        .expect("client");

        assert_eq!(
            broker.url("oauth/token").expect("url").as_str(),
            "https://broker.example.com/v1/oauth/token"
        );
    }

    #[test]
    fn location_payload_blanks_become_none() {
        let payload = r#"[{
            "location_id": "L1",
            "location_token": "tok",
            "business_name": "Corner Shop",
            "city": "Springfield",
            "phone": ""
        }]"#;
        let parsed: Vec<LocationResponse> = serde_json::from_str(payload).expect("decode");
        let location = ProviderLocation::from(parsed.into_iter().next().expect("one location"));

        assert_eq!(location.external_id, "L1");
        assert_eq!(location.fields.city.as_deref(), Some("Springfield"));
        assert_eq!(location.fields.phone, None);
    }

    #[test]
    fn authorization_payload_decodes() {
        let payload = r#"{
            "access_token": "a",
            "refresh_token": "r",
            "expires_at": "2030-01-01T00:00:00Z",
            "company_id": "C1",
            "company_name": "Acme"
        }"#;
        let tenant: AuthorizedTenant = serde_json::from_str(payload).expect("decode");
        assert_eq!(tenant.tenant_id, "C1");
        assert_eq!(tenant.tenant_name, "Acme");
    }
}
