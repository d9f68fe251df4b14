//! Provider client trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
pub use reqwest::Method;
use serde_json::Value;

use crate::credential::{AccessContext, Credential, RenewalPolicy, TokenPair};
use crate::error::{credential_error, CredentialErrorKind, Error};

/// A request against a provider's resource API, relative to its API base URL.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ResourceRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn patch(path: &str, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful resource response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: u16,
    /// Decoded JSON body; `Value::Null` for empty bodies.
    pub body: Value,
}

/// Trait for external provider integrations.
///
/// Implementations perform the provider's HTTP operations and normalize every
/// failure to a [`crate::error::ProviderErrorKind`]. In particular an expired,
/// revoked or otherwise rejected token must surface as `Unauthorized`, whatever
/// status or error code the provider uses for it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, used as the `provider_id` half of storage keys.
    fn id(&self) -> &str;

    /// Build the URL the account owner is sent to in order to grant access.
    ///
    /// # Arguments
    ///
    /// * `state` - Anti-forgery value echoed back on the callback
    /// * `pkce_challenge` - PKCE code challenge, when the provider supports PKCE
    fn authorization_url(&self, state: &str, pkce_challenge: Option<&str>) -> Result<String, Error>;

    /// Whether authorization requests for this provider should carry PKCE.
    fn supports_pkce(&self) -> bool {
        false
    }

    /// Provider-specific thresholds overriding the manager default.
    fn renewal_policy(&self) -> Option<RenewalPolicy> {
        None
    }

    /// Exchange an authorization code for a token pair.
    async fn exchange_code(&self, code: &str, pkce_verifier: Option<&str>)
        -> Result<TokenPair, Error>;

    /// Exchange a refresh token for a new pair.
    ///
    /// A dead refresh token (`invalid_grant`, 401) must map to `Unauthorized`.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error>;

    /// Revoke the credential provider-side using the client's own credentials.
    async fn revoke(&self, credential: &Credential) -> Result<(), Error>;

    /// Call a resource endpoint with an access token.
    async fn call_resource(
        &self,
        access_token: &str,
        request: ResourceRequest,
    ) -> Result<ResourceResponse, Error>;

    /// Fetch provider-side settings stored alongside a freshly exchanged credential.
    async fn account_metadata(
        &self,
        _access: &AccessContext,
    ) -> Result<HashMap<String, String>, Error> {
        Ok(HashMap::new())
    }
}

/// The set of providers a manager can serve, keyed by [`Provider::id`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider with the same id.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn Provider>, Error> {
        self.providers.get(provider_id).cloned().ok_or_else(|| {
            credential_error(
                CredentialErrorKind::UnknownProvider,
                &format!("No provider registered as '{}'", provider_id),
            )
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_request_builders() {
        let request = ResourceRequest::post("/v2/terminals/checkouts", json!({ "amount": 100 }))
            .with_query("location_id", "L1");

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/v2/terminals/checkouts");
        assert_eq!(request.query, vec![("location_id".to_string(), "L1".to_string())]);
        assert_eq!(request.body, Some(json!({ "amount": 100 })));

        let request = ResourceRequest::delete("/v2/meetings/42");
        assert_eq!(request.method, Method::DELETE);
        assert!(request.body.is_none());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.get("square").err().unwrap();
        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Credential(CredentialErrorKind::UnknownProvider)
        );
    }
}
