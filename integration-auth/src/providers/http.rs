//! Generic OAuth 2.0 provider client driven by [`HttpProviderConfig`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::*;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::config::{ClientAuth, HttpProviderConfig, Revocation, TokenRequestFormat};
use crate::credential::{AccessContext, Credential, RenewalPolicy, TokenPair};
use crate::error::{provider_error, Error, ErrorKind, ProviderErrorKind};
use crate::http::{HttpClientBuilder, ResourceClient};
use crate::provider::{Provider, ResourceRequest, ResourceResponse};

/// Token endpoint response. Square sends `expires_at`, most others `expires_in`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Provider client for OAuth 2.0 services with a JSON resource API.
pub struct HttpProvider {
    config: HttpProviderConfig,
    token_client: reqwest::Client,
    resource_client: ResourceClient,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, Error> {
        let builder = HttpClientBuilder::from_config(config.http.clone());
        let token_client = builder.build_token_client()?;
        let resource_client = builder.build_resource_client()?;

        Ok(Self {
            config,
            token_client,
            resource_client,
        })
    }

    pub fn config(&self) -> &HttpProviderConfig {
        &self.config
    }

    fn client_secret(&self) -> &str {
        self.config.client_secret.expose_secret()
    }

    /// POST a grant to the token endpoint and decode the resulting pair.
    async fn token_request(&self, grant: Vec<(&str, &str)>) -> Result<TokenPair, Error> {
        let mut params: Vec<(&str, &str)> = grant;
        if self.config.client_auth == ClientAuth::RequestBody {
            params.push(("client_id", self.config.client_id.as_str()));
            params.push(("client_secret", self.client_secret()));
        }

        let mut request = self.token_client.post(&self.config.token_url);
        request = match self.config.token_request_format {
            TokenRequestFormat::Form => request.form(&params),
            TokenRequestFormat::Json => request.json(&json_object(&params)),
        };
        if self.config.client_auth == ClientAuth::Basic {
            request = request.basic_auth(&self.config.client_id, Some(self.client_secret()));
        }

        let response = request.send().await.map_err(|e| {
            warn!("Failed to reach {} token endpoint: {:?}", self.config.id, e);
            Error::from(e)
        })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(self.classify(status, &body));
        }

        let tokens: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!("Failed to parse {} token response: {:?}", self.config.id, e);
            Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Provider(ProviderErrorKind::InvalidResponse),
            }
        })?;

        Ok(self.token_pair(tokens, Utc::now()))
    }

    fn token_pair(&self, tokens: TokenResponse, now: DateTime<Utc>) -> TokenPair {
        let expires_at = tokens
            .expires_at
            .or_else(|| tokens.expires_in.map(|secs| now + Duration::seconds(secs)));
        let provider_account_id = self
            .config
            .account_id_field
            .as_ref()
            .and_then(|field| tokens.extra.get(field))
            .and_then(scalar_to_string);
        let scopes = tokens
            .scope
            .map(|scope| scope.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        TokenPair {
            access_token: SecretString::new(tokens.access_token),
            refresh_token: tokens.refresh_token.map(SecretString::new),
            expires_at,
            provider_account_id,
            scopes,
        }
    }

    /// Normalize a non-success response to a provider error kind.
    ///
    /// An expired or revoked token is reported by status 401, by an OAuth
    /// `invalid_grant`, or by one of the provider's own error codes on any status.
    fn classify(&self, status: StatusCode, body: &str) -> Error {
        let codes = serde_json::from_str::<Value>(body)
            .map(|value| error_codes(&value))
            .unwrap_or_default();

        let rejects_token = codes
            .iter()
            .any(|code| code == "invalid_grant" || self.config.unauthorized_codes.contains(code));

        let kind = if status == StatusCode::UNAUTHORIZED || rejects_token {
            ProviderErrorKind::Unauthorized
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            ProviderErrorKind::RateLimited
        } else if status.is_server_error() {
            ProviderErrorKind::ServerError
        } else {
            ProviderErrorKind::ValidationError
        };

        warn!(
            "{} responded {} [{}]: {:?}",
            self.config.id,
            status.as_u16(),
            codes.join(","),
            kind
        );

        provider_error(
            kind,
            &format!(
                "{} responded {} [{}]",
                self.config.id,
                status.as_u16(),
                codes.join(",")
            ),
        )
    }

    fn resource_url(&self, path: &str) -> Result<Url, Error> {
        let url = format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path);
        Url::parse(&url).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Provider(ProviderErrorKind::ValidationError),
        })
    }

    async fn revoke_with(&self, revocation: &Revocation, credential: &Credential) -> Result<(), Error> {
        let request = match revocation {
            Revocation::TokenForm { url } => {
                let token = credential
                    .refresh_token()
                    .unwrap_or_else(|| credential.access_token())
                    .expose_secret()
                    .as_str();
                let mut params = vec![("token", token)];
                let request = self.token_client.post(url);
                match self.config.client_auth {
                    ClientAuth::Basic => request
                        .basic_auth(&self.config.client_id, Some(self.client_secret()))
                        .form(&params),
                    ClientAuth::RequestBody => {
                        params.push(("client_id", self.config.client_id.as_str()));
                        params.push(("client_secret", self.client_secret()));
                        request.form(&params)
                    }
                }
            }
            Revocation::MerchantJson { url } => {
                let merchant_id = credential.provider_account_id().ok_or_else(|| {
                    provider_error(
                        ProviderErrorKind::ValidationError,
                        "Revocation requires the provider account id",
                    )
                })?;
                self.token_client
                    .post(url)
                    .header(AUTHORIZATION, format!("Client {}", self.client_secret()))
                    .json(&serde_json::json!({
                        "client_id": self.config.client_id,
                        "merchant_id": merchant_id,
                        "revoke_only_access_token": false,
                    }))
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.classify(status, &body))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn authorization_url(&self, state: &str, pkce_challenge: Option<&str>) -> Result<String, Error> {
        let mut url = Url::parse(&self.config.authorize_url).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Provider(ProviderErrorKind::ValidationError),
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_id);
            if let Some(redirect_uri) = &self.config.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            for (name, value) in &self.config.extra_authorize_params {
                query.append_pair(name, value);
            }
            query.append_pair("state", state);
            if let Some(challenge) = pkce_challenge {
                query.append_pair("code_challenge", challenge);
                query.append_pair("code_challenge_method", "S256");
            }
        }

        Ok(url.into())
    }

    fn supports_pkce(&self) -> bool {
        self.config.pkce
    }

    fn renewal_policy(&self) -> Option<RenewalPolicy> {
        self.config.renewal_policy
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenPair, Error> {
        debug!("Exchanging {} authorization code", self.config.id);

        let mut grant = vec![("grant_type", "authorization_code"), ("code", code)];
        if let Some(redirect_uri) = &self.config.redirect_uri {
            grant.push(("redirect_uri", redirect_uri.as_str()));
        }
        if let Some(verifier) = pkce_verifier {
            grant.push(("code_verifier", verifier));
        }

        let pair = self.token_request(grant).await?;
        info!("Exchanged {} authorization code for tokens", self.config.id);
        Ok(pair)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        debug!("Refreshing {} access token", self.config.id);
        self.token_request(vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), Error> {
        match &self.config.revocation {
            Some(revocation) => self.revoke_with(revocation, credential).await,
            None => {
                debug!("{} has no revocation endpoint", self.config.id);
                Ok(())
            }
        }
    }

    async fn call_resource(
        &self,
        access_token: &str,
        request: ResourceRequest,
    ) -> Result<ResourceResponse, Error> {
        let url = self.resource_url(&request.path)?;
        trace!("{} {} {}", self.config.id, request.method, url.path());

        let mut builder = self
            .resource_client
            .request(request.method.clone(), url)
            .bearer_auth(access_token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Provider(ProviderErrorKind::ValidationError),
            })?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(self.classify(status, &text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Provider(ProviderErrorKind::InvalidResponse),
            })?
        };

        Ok(ResourceResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn account_metadata(
        &self,
        access: &AccessContext,
    ) -> Result<HashMap<String, String>, Error> {
        let mut metadata = HashMap::new();
        let Some(info) = &self.config.account_info else {
            return Ok(metadata);
        };

        let path = if info.path.contains("{account_id}") {
            match &access.provider_account_id {
                Some(account_id) => info.path.replace("{account_id}", account_id),
                None => {
                    debug!("No {} account id to look up settings for", self.config.id);
                    return Ok(metadata);
                }
            }
        } else {
            info.path.clone()
        };

        let response = self
            .call_resource(access.access_token.expose_secret(), ResourceRequest::get(&path))
            .await?;
        for (key, pointer) in &info.fields {
            if let Some(value) = response.body.pointer(pointer).and_then(scalar_to_string) {
                metadata.insert(key.clone(), value);
            }
        }

        Ok(metadata)
    }
}

fn json_object(params: &[(&str, &str)]) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect(),
    )
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Error codes from the shapes providers use: OAuth `{"error": ..}`,
/// `{"code": ..}`, and Square's `{"errors": [{"code": ..}]}`.
fn error_codes(value: &Value) -> Vec<String> {
    let mut codes = Vec::new();
    for field in ["error", "code"] {
        if let Some(code) = value.get(field).and_then(scalar_to_string) {
            codes.push(code);
        }
    }
    if let Some(errors) = value.get("errors").and_then(Value::as_array) {
        codes.extend(
            errors
                .iter()
                .filter_map(|error| error.get("code").and_then(scalar_to_string)),
        );
    }
    codes
}
