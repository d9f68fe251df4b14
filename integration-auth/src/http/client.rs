//! HTTP client construction for provider calls.

use std::time::Duration;

use reqwest::{IntoUrl, Method};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::RetryTransientMiddleware;

use super::BackoffPolicy;
use crate::error::Error;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-attempt timeout. Each transport retry gets a fresh one, so a caller
    /// bounding the whole call should leave room for `max_retries + 1` attempts.
    pub timeout: Duration,
    /// Maximum number of transport retries for resource calls.
    pub max_retries: u32,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            user_agent: format!("integration-auth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Resource API client.
///
/// Idempotent requests go through the retry middleware. POST and PATCH are sent
/// exactly once: a replay after a lost response could create a second meeting or
/// issue a second refund.
#[derive(Clone)]
pub struct ResourceClient {
    retrying: ClientWithMiddleware,
    single_shot: ClientWithMiddleware,
}

impl ResourceClient {
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        if is_idempotent(&method) {
            self.retrying.request(method, url)
        } else {
            self.single_shot.request(method, url)
        }
    }
}

/// Methods whose requests may be repeated without changing the outcome.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Builder for the two clients a provider needs.
///
/// Token endpoint calls get a plain client: replaying a refresh request after an
/// ambiguous failure can spend a rotating refresh token twice. Resource calls get
/// exponential backoff on transient failures.
#[derive(Debug, Clone, Default)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Client for token, revoke and authorization endpoints.
    pub fn build_token_client(&self) -> Result<reqwest::Client, Error> {
        Ok(reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent.clone())
            .build()?)
    }

    /// Client for resource endpoints.
    pub fn build_resource_client(&self) -> Result<ResourceClient, Error> {
        let client = self.build_token_client()?;
        let retry_policy = BackoffPolicy::new(self.config.max_retries);

        Ok(ResourceClient {
            retrying: ClientBuilder::new(client.clone())
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build(),
            single_shot: ClientBuilder::new(client).build(),
        })
    }
}
