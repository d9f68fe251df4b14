//! # integration-auth
//!
//! Lifecycle management for delegated credentials of third-party integrations
//! (Square, Zoom and any OAuth 2.0 provider with a JSON API):
//! - Authorization-code handshake with single-use state and PKCE
//! - Encrypted token persistence
//! - Age based proactive renewal and single-flight refresh per account
//! - Retry-once on rejected access tokens
//! - Revocation cascading through storage and cache
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use integration_auth::{
//!     cache::MemoryCache,
//!     manager::{CredentialManager, ManagerConfig},
//!     provider::{ProviderRegistry, ResourceRequest},
//!     providers::{square_config, HttpProvider, SquareEnvironment},
//!     store::MemoryStorage,
//! };
//!
//! let square = HttpProvider::new(square_config(SquareEnvironment::Sandbox, id, secret, None))?;
//! let manager = CredentialManager::new(
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(MemoryCache::new()),
//!     ProviderRegistry::new().with(Arc::new(square)),
//!     ManagerConfig::default(),
//! );
//! let locations = manager
//!     .call("account-1", "square", ResourceRequest::get("/v2/locations"))
//!     .await?;
//! ```

pub mod cache;
pub mod credential;
pub mod error;
pub mod http;
pub mod manager;
pub mod oauth;
pub mod provider;
pub mod providers;
pub mod revocation;
pub mod store;

// Re-export commonly used types
pub use credential::{Credential, CredentialState, RenewalPolicy, TokenRecord};
pub use error::{Error, ErrorKind};
pub use manager::{CredentialManager, ManagerConfig};
pub use provider::{Provider, ProviderRegistry, ResourceRequest, ResourceResponse};
