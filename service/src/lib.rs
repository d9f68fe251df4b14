use std::sync::Arc;

use config::Config;
use integration_auth::cache::MemoryCache;
use integration_auth::error::{storage_error, Error, StorageErrorKind};
use integration_auth::http::HttpClientConfig;
use integration_auth::providers::{square_config, zoom_config, HttpProvider};
use integration_auth::store::{FileStorage, TokenCipher};
use integration_auth::{CredentialManager, ManagerConfig, ProviderRegistry};
use log::{info, warn};

pub mod config;
pub mod logging;

/// The manager wired to the encrypted file store and an in-process cache.
pub type Manager = CredentialManager<FileStorage, MemoryCache>;

/// HTTP settings for provider clients.
///
/// The manager bounds a whole provider call by `provider_timeout`, transport
/// retries included, so each attempt gets an equal share of it. Backoff delays
/// between attempts come out of the same budget.
pub fn http_client_config(config: &Config) -> HttpClientConfig {
    let attempts = config.http_max_retries.saturating_add(1);
    HttpClientConfig {
        timeout: config.provider_timeout() / attempts,
        max_retries: config.http_max_retries,
        ..HttpClientConfig::default()
    }
}

/// Build a provider registry holding every provider with configured client credentials.
pub fn init_providers(config: &Config) -> Result<ProviderRegistry, Error> {
    let http = http_client_config(config);
    let mut registry = ProviderRegistry::new();

    match config.square_credentials() {
        Some((client_id, client_secret)) => {
            let square = square_config(
                config.square_environment,
                &client_id,
                client_secret,
                config.square_redirect_uri(),
            )
            .with_renewal_policy(config.renewal_policy())
            .with_http(http.clone());
            registry.register(Arc::new(HttpProvider::new(square)?));
        }
        None => info!("Square client credentials not configured, skipping"),
    }

    match config.zoom_credentials() {
        Some((client_id, client_secret)) => {
            let zoom = zoom_config(&client_id, client_secret, config.zoom_redirect_uri())
                .with_http(http);
            registry.register(Arc::new(HttpProvider::new(zoom)?));
        }
        None => info!("Zoom client credentials not configured, skipping"),
    }

    if registry.ids().is_empty() {
        warn!("No providers configured");
    }
    Ok(registry)
}

/// Build the credential manager described by `config`.
pub fn init_manager(config: &Config) -> Result<Manager, Error> {
    let key = config.token_encryption_key().ok_or_else(|| {
        storage_error(
            StorageErrorKind::EncryptionFailed,
            "TOKEN_ENCRYPTION_KEY is not set",
        )
    })?;
    let storage = FileStorage::new(config.token_store_path(), TokenCipher::from_hex(key)?);
    let providers = init_providers(config)?;

    info!(
        "Credential manager: store={}, providers=[{}], soft={}d, hard={}d, timeout={}s",
        config.token_store_path().display(),
        providers.ids().join(","),
        config.soft_refresh_days,
        config.hard_expiry_days,
        config.provider_timeout_secs,
    );

    Ok(CredentialManager::new(
        Arc::new(storage),
        Arc::new(MemoryCache::new()),
        providers,
        ManagerConfig {
            policy: config.renewal_policy(),
            provider_timeout: config.provider_timeout(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use integration_auth::error::ErrorKind;
    use integration_auth::{Provider, RenewalPolicy};

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["credential_keeper"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_only_configured_providers_are_registered() {
        let registry = init_providers(&config(&[
            "--square-client-id",
            "sq0idp-app",
            "--square-client-secret",
            "sq0csp-secret",
        ]))
        .unwrap();

        assert_eq!(registry.ids(), vec!["square"]);
        assert!(registry.get("zoom").is_err());
    }

    #[test]
    fn test_square_uses_configured_thresholds() {
        let registry = init_providers(&config(&[
            "--square-client-id",
            "sq0idp-app",
            "--square-client-secret",
            "sq0csp-secret",
            "--soft-refresh-days",
            "10",
            "--hard-expiry-days",
            "15",
        ]))
        .unwrap();

        let square = registry.get("square").unwrap();
        assert_eq!(
            square.renewal_policy(),
            Some(RenewalPolicy::new(10, 15))
        );
    }

    #[test]
    fn test_every_attempt_fits_in_the_provider_timeout() {
        let http = http_client_config(&config(&[
            "--provider-timeout-secs",
            "30",
            "--http-max-retries",
            "2",
        ]));
        assert_eq!(http.timeout, std::time::Duration::from_secs(10));
        assert_eq!(http.max_retries, 2);

        let http = http_client_config(&config(&["--http-max-retries", "0"]));
        assert_eq!(http.timeout, std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_manager_requires_encryption_key() {
        let err = init_manager(&config(&[])).err().unwrap();
        assert_eq!(
            err.error_kind,
            ErrorKind::Storage(StorageErrorKind::EncryptionFailed)
        );
    }

    #[tokio::test]
    async fn test_manager_reads_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["--zoom-client-id", "zoom-client", "--zoom-client-secret", "s"])
            .set_token_store_path(dir.path().join("tokens.json"))
            .set_token_encryption_key(KEY.to_string());

        let manager = init_manager(&config).unwrap();
        assert!(manager.credential("acct-1", "zoom").await.unwrap().is_none());
        assert_eq!(manager.providers().ids(), vec!["zoom"]);
    }
}
