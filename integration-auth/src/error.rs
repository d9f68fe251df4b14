//! Error types for the `integration-auth` crate.
//!
//! Follows the same pattern as the rest of the workspace: a root `Error` struct
//! holding an error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for integration-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in integration-auth.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Credential(CredentialErrorKind),
    Provider(ProviderErrorKind),
    Storage(StorageErrorKind),
    Cache,
    Http(HttpErrorKind),
}

/// Credential lifecycle errors. Apart from `UnknownProvider`, the account has to
/// go through the authorization handshake again.
#[derive(Debug, PartialEq)]
pub enum CredentialErrorKind {
    NoCredential,
    CredentialExpired,
    CredentialRevoked,
    RefreshRejected,
    InvalidState,
    AuthorizationDenied,
    AuthorizationFailed,
    UnknownProvider,
}

/// Normalized errors reported by a provider client.
#[derive(Debug, PartialEq)]
pub enum ProviderErrorKind {
    Unauthorized,
    RateLimited,
    ServerError,
    ValidationError,
    NetworkTimeout,
    InvalidResponse,
}

/// Errors from token storage backends.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    EncryptionFailed,
    DecryptionFailed,
    Backend,
}

/// Errors from HTTP client construction.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
}

impl Error {
    /// Returns the provider error kind, if this error came from a provider call.
    pub fn provider_kind(&self) -> Option<&ProviderErrorKind> {
        match &self.error_kind {
            ErrorKind::Provider(kind) => Some(kind),
            _ => None,
        }
    }

    /// True when the provider rejected the presented token.
    pub fn is_unauthorized(&self) -> bool {
        self.provider_kind() == Some(&ProviderErrorKind::Unauthorized)
    }

    /// True for provider failures that say nothing about the credential itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.provider_kind(),
            Some(
                ProviderErrorKind::RateLimited
                    | ProviderErrorKind::ServerError
                    | ProviderErrorKind::NetworkTimeout
            )
        )
    }

    /// True when the integration must be reconnected by the account owner.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Credential(
                CredentialErrorKind::NoCredential
                    | CredentialErrorKind::CredentialExpired
                    | CredentialErrorKind::CredentialRevoked
                    | CredentialErrorKind::RefreshRejected
                    | CredentialErrorKind::InvalidState
                    | CredentialErrorKind::AuthorizationDenied
                    | CredentialErrorKind::AuthorizationFailed
            )
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Credential(kind) => write!(f, "Credential error: {:?}", kind)?,
            ErrorKind::Provider(kind) => write!(f, "Provider error: {:?}", kind)?,
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind)?,
            ErrorKind::Cache => write!(f, "Cache error")?,
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_decode() {
            ErrorKind::Provider(ProviderErrorKind::InvalidResponse)
        } else {
            // Timeouts and connection failures alike: the provider could not be reached.
            ErrorKind::Provider(ProviderErrorKind::NetworkTimeout)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => Error::from(err),
            reqwest_middleware::Error::Middleware(err) => Error {
                source: Some(err.into()),
                error_kind: ErrorKind::Provider(ProviderErrorKind::NetworkTimeout),
            },
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Provider(ProviderErrorKind::NetworkTimeout),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Backend),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Backend),
        }
    }
}

/// Helper function to create credential errors.
pub fn credential_error(kind: CredentialErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Credential(kind),
    }
}

/// Helper function to create provider errors.
pub fn provider_error(kind: ProviderErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Provider(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function to create cache errors.
pub fn cache_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Cache,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_require_reconnect() {
        let err = credential_error(CredentialErrorKind::CredentialExpired, "expired");
        assert!(err.requires_reconnect());

        let err = credential_error(CredentialErrorKind::UnknownProvider, "nope");
        assert!(!err.requires_reconnect());
    }

    #[test]
    fn test_provider_errors_do_not_require_reconnect() {
        let err = provider_error(ProviderErrorKind::RateLimited, "slow down");
        assert!(!err.requires_reconnect());
        assert!(err.is_transient());
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_unauthorized_is_not_transient() {
        let err = provider_error(ProviderErrorKind::Unauthorized, "401");
        assert!(err.is_unauthorized());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_display_includes_source_message() {
        let err = credential_error(CredentialErrorKind::NoCredential, "acct-1/square");
        assert_eq!(
            err.to_string(),
            "Credential error: NoCredential (acct-1/square)"
        );
    }
}
