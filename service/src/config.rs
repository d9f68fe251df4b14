use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use integration_auth::credential::{
    RenewalPolicy, DEFAULT_HARD_THRESHOLD_DAYS, DEFAULT_SOFT_THRESHOLD_DAYS,
};
use integration_auth::providers::SquareEnvironment;
use log::LevelFilter;
use secrecy::SecretString;

/// Default location of the encrypted token store.
pub const DEFAULT_TOKEN_STORE_PATH: &str = "credentials.json";

fn parse_square_environment(value: &str) -> Result<SquareEnvironment, String> {
    match value.to_lowercase().as_str() {
        "sandbox" => Ok(SquareEnvironment::Sandbox),
        "production" => Ok(SquareEnvironment::Production),
        other => Err(format!(
            "unknown Square environment '{}', expected sandbox or production",
            other
        )),
    }
}

#[derive(Clone, Debug, Parser)]
pub struct Config {
    /// Days after issuance at which a credential is refreshed before use.
    #[arg(long, env, default_value_t = DEFAULT_SOFT_THRESHOLD_DAYS)]
    pub soft_refresh_days: i64,

    /// Days after issuance at which a credential is revoked instead of used.
    #[arg(long, env, default_value_t = DEFAULT_HARD_THRESHOLD_DAYS)]
    pub hard_expiry_days: i64,

    /// Upper bound in seconds on every provider call, transport retries included
    #[arg(long, env, default_value_t = 30)]
    pub provider_timeout_secs: u64,

    /// Transport retries for provider resource calls (token calls are never retried)
    #[arg(long, env, default_value_t = 2)]
    pub http_max_retries: u32,

    /// Path of the encrypted token store file
    #[arg(long, env, default_value = DEFAULT_TOKEN_STORE_PATH)]
    token_store_path: PathBuf,

    /// Hex encoded 32-byte key sealing tokens at rest
    #[arg(long, env, hide_env_values = true)]
    token_encryption_key: Option<String>,

    /// Square application id
    #[arg(long, env)]
    square_client_id: Option<String>,

    /// Square application secret
    #[arg(long, env, hide_env_values = true)]
    square_client_secret: Option<String>,

    /// Redirect URI registered with Square
    #[arg(long, env)]
    square_redirect_uri: Option<String>,

    /// Square environment to connect to
    #[arg(
        long,
        env,
        default_value = "sandbox",
        value_parser = parse_square_environment
    )]
    pub square_environment: SquareEnvironment,

    /// Zoom OAuth client id
    #[arg(long, env)]
    zoom_client_id: Option<String>,

    /// Zoom OAuth client secret
    #[arg(long, env, hide_env_values = true)]
    zoom_client_secret: Option<String>,

    /// Redirect URI registered with Zoom
    #[arg(long, env)]
    zoom_redirect_uri: Option<String>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,
}

/// Load `.env` into the process environment so the `env` fallbacks below see it.
pub fn load_dotenv() {
    dotenv().ok();
}

impl Config {
    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy::new(self.soft_refresh_days, self.hard_expiry_days)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn token_store_path(&self) -> &Path {
        &self.token_store_path
    }

    pub fn set_token_store_path(mut self, path: PathBuf) -> Self {
        self.token_store_path = path;
        self
    }

    pub fn token_encryption_key(&self) -> Option<&str> {
        self.token_encryption_key.as_deref()
    }

    pub fn set_token_encryption_key(mut self, key: String) -> Self {
        self.token_encryption_key = Some(key);
        self
    }

    /// Square client id and secret, when both are configured.
    pub fn square_credentials(&self) -> Option<(String, SecretString)> {
        client_credentials(&self.square_client_id, &self.square_client_secret)
    }

    pub fn square_redirect_uri(&self) -> Option<String> {
        self.square_redirect_uri.clone()
    }

    /// Zoom client id and secret, when both are configured.
    pub fn zoom_credentials(&self) -> Option<(String, SecretString)> {
        client_credentials(&self.zoom_client_id, &self.zoom_client_secret)
    }

    pub fn zoom_redirect_uri(&self) -> Option<String> {
        self.zoom_redirect_uri.clone()
    }
}

fn client_credentials(
    client_id: &Option<String>,
    client_secret: &Option<String>,
) -> Option<(String, SecretString)> {
    match (client_id, client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
            Some((id.clone(), SecretString::new(secret.clone())))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["credential_keeper"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_thresholds_default_to_twenty_and_thirty_days() {
        let config = parse(&[]);
        assert_eq!(config.renewal_policy(), RenewalPolicy::new(20, 30));
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let config = parse(&["--soft-refresh-days", "7", "--hard-expiry-days", "14"]);
        assert_eq!(config.renewal_policy(), RenewalPolicy::new(7, 14));
    }

    #[test]
    fn test_square_environment_parsing() {
        let config = parse(&["--square-environment", "PRODUCTION"]);
        assert_eq!(config.square_environment, SquareEnvironment::Production);

        assert!(
            Config::try_parse_from(["credential_keeper", "--square-environment", "staging"])
                .is_err()
        );
    }

    #[test]
    fn test_client_credentials_require_id_and_secret() {
        let config = parse(&["--zoom-client-id", "zoom-client"]);
        assert!(config.zoom_credentials().is_none());

        let config = parse(&[
            "--zoom-client-id",
            "zoom-client",
            "--zoom-client-secret",
            "zoom-secret",
        ]);
        let (id, secret) = config.zoom_credentials().unwrap();
        assert_eq!(id, "zoom-client");
        assert_eq!(secret.expose_secret(), "zoom-secret");
    }

    #[test]
    fn test_log_level_parsing() {
        let config = parse(&["--log-level-filter", "DEBUG"]);
        assert_eq!(config.log_level_filter, LevelFilter::Debug);
    }
}
