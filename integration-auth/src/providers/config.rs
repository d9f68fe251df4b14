//! Endpoint and dialect settings for [`super::HttpProvider`], with presets.

use secrecy::SecretString;

use crate::credential::RenewalPolicy;
use crate::http::HttpClientConfig;

/// How the client authenticates itself to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `Authorization: Basic base64(client_id:client_secret)`
    Basic,
    /// `client_id` and `client_secret` sent as request parameters.
    RequestBody,
}

/// Encoding of token endpoint requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRequestFormat {
    Form,
    Json,
}

/// Provider-side revocation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revocation {
    /// RFC 7009 style: form `token=<refresh token>`, client authenticated per [`ClientAuth`].
    TokenForm { url: String },
    /// Merchant scoped: JSON `{client_id, merchant_id}` with `Authorization: Client <secret>`.
    MerchantJson { url: String },
}

/// Resource endpoint read after a code exchange to enrich the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfoEndpoint {
    /// Path relative to the API base. `{account_id}` is replaced by the provider account id.
    pub path: String,
    /// `(metadata key, JSON pointer into the response)` pairs.
    pub fields: Vec<(String, String)>,
}

/// Configuration for an OAuth 2.0 provider reached over HTTPS/JSON.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub scopes: Vec<String>,
    pub extra_authorize_params: Vec<(String, String)>,
    pub client_auth: ClientAuth,
    pub token_request_format: TokenRequestFormat,
    pub revocation: Option<Revocation>,
    /// Token response field carrying the provider account id (e.g. `merchant_id`).
    pub account_id_field: Option<String>,
    pub account_info: Option<AccountInfoEndpoint>,
    /// Provider error codes that mean the presented token is expired or revoked.
    pub unauthorized_codes: Vec<String>,
    pub pkce: bool,
    pub renewal_policy: Option<RenewalPolicy>,
    pub http: HttpClientConfig,
}

impl HttpProviderConfig {
    /// A standards-following provider: form requests, Basic client auth, no revocation.
    pub fn new(
        id: &str,
        client_id: &str,
        client_secret: SecretString,
        authorize_url: &str,
        token_url: &str,
        api_base_url: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            client_id: client_id.to_string(),
            client_secret,
            redirect_uri: None,
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            api_base_url: api_base_url.to_string(),
            scopes: Vec::new(),
            extra_authorize_params: Vec::new(),
            client_auth: ClientAuth::Basic,
            token_request_format: TokenRequestFormat::Form,
            revocation: None,
            account_id_field: None,
            account_info: None,
            unauthorized_codes: Vec::new(),
            pkce: false,
            renewal_policy: None,
            http: HttpClientConfig::default(),
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: Option<String>) -> Self {
        self.redirect_uri = redirect_uri;
        self
    }

    pub fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }

    pub fn with_renewal_policy(mut self, policy: RenewalPolicy) -> Self {
        self.renewal_policy = Some(policy);
        self
    }
}

/// Square deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquareEnvironment {
    Sandbox,
    Production,
}

impl SquareEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            SquareEnvironment::Sandbox => "https://connect.squareupsandbox.com",
            SquareEnvironment::Production => "https://connect.squareup.com",
        }
    }
}

/// Square OAuth configuration.
///
/// Square access tokens live for 30 days and are renewed with a
/// non-rotating refresh token, hence the 20/30 day policy.
pub fn square_config(
    environment: SquareEnvironment,
    client_id: &str,
    client_secret: SecretString,
    redirect_uri: Option<String>,
) -> HttpProviderConfig {
    let base = environment.base_url();
    let mut config = HttpProviderConfig::new(
        "square",
        client_id,
        client_secret,
        &format!("{}/oauth2/authorize", base),
        &format!("{}/oauth2/token", base),
        base,
    )
    .with_redirect_uri(redirect_uri)
    .with_renewal_policy(RenewalPolicy::new(20, 30));

    config.scopes = [
        "DEVICE_CREDENTIAL_MANAGEMENT",
        "PAYMENTS_WRITE",
        "PAYMENTS_READ",
        "MERCHANT_PROFILE_READ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    config.extra_authorize_params = vec![("session".to_string(), "false".to_string())];
    config.client_auth = ClientAuth::RequestBody;
    config.token_request_format = TokenRequestFormat::Json;
    config.revocation = Some(Revocation::MerchantJson {
        url: format!("{}/oauth2/revoke", base),
    });
    config.account_id_field = Some("merchant_id".to_string());
    config.account_info = Some(AccountInfoEndpoint {
        path: "/v2/merchants/{account_id}".to_string(),
        fields: vec![("currency".to_string(), "/merchant/currency".to_string())],
    });
    config.unauthorized_codes = vec![
        "ACCESS_TOKEN_EXPIRED".to_string(),
        "ACCESS_TOKEN_REVOKED".to_string(),
        "UNAUTHORIZED".to_string(),
    ];
    config
}

/// Zoom OAuth configuration.
///
/// Zoom access tokens last an hour and refresh tokens rotate on every refresh.
pub fn zoom_config(
    client_id: &str,
    client_secret: SecretString,
    redirect_uri: Option<String>,
) -> HttpProviderConfig {
    let mut config = HttpProviderConfig::new(
        "zoom",
        client_id,
        client_secret,
        "https://zoom.us/oauth/authorize",
        "https://zoom.us/oauth/token",
        "https://api.zoom.us",
    )
    .with_redirect_uri(redirect_uri);

    config.revocation = Some(Revocation::TokenForm {
        url: "https://zoom.us/oauth/revoke".to_string(),
    });
    config.account_info = Some(AccountInfoEndpoint {
        path: "/v2/users/me".to_string(),
        fields: vec![
            ("zoom_user_id".to_string(), "/id".to_string()),
            ("zoom_account_id".to_string(), "/account_id".to_string()),
        ],
    });
    // 124: "Invalid access token."
    config.unauthorized_codes = vec!["124".to_string()];
    config.pkce = true;
    config
}
