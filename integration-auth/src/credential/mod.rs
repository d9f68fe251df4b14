//! Delegated credential value types.
//!
//! A [`TokenRecord`] is what a [`crate::store::Storage`] persists for one
//! `(account_id, provider_id)` key. A [`Credential`] wraps a record with its key
//! while the manager works on it, and answers lifecycle questions about it.

mod policy;

pub use policy::{
    RenewalPolicy, DEFAULT_EXPIRY_SKEW_MINUTES, DEFAULT_HARD_THRESHOLD_DAYS,
    DEFAULT_SOFT_THRESHOLD_DAYS,
};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{credential_error, CredentialErrorKind, Error};

/// Token pair returned by a provider from a code exchange or a refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Access token for API requests.
    pub access_token: SecretString,
    /// Refresh token, if the provider issued (or rotated) one.
    pub refresh_token: Option<SecretString>,
    /// Provider-declared absolute expiry of the access token.
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider-side merchant or account identifier.
    pub provider_account_id: Option<String>,
    /// Granted scopes.
    pub scopes: Vec<String>,
}

/// Persisted token record for one account and provider.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// When the pair was last obtained, by code exchange or refresh.
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_account_id: Option<String>,
    pub scopes: Vec<String>,
    /// Provider derived settings such as the merchant currency.
    pub metadata: HashMap<String, String>,
}

impl TokenRecord {
    /// Build a fresh record from a newly issued token pair.
    pub fn issued(pair: TokenPair, now: DateTime<Utc>) -> Self {
        let expires_at = match pair.expires_at {
            Some(expires_at) if expires_at <= now => {
                warn!("Provider declared an expiry at or before issuance; ignoring it");
                None
            }
            other => other,
        };

        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            issued_at: now,
            expires_at,
            provider_account_id: pair.provider_account_id,
            scopes: pair.scopes,
            metadata: HashMap::new(),
        }
    }

    /// Build the record that replaces `self` after a successful refresh.
    ///
    /// Providers that do not rotate refresh tokens omit them from the refresh
    /// response, and most omit the account id, so both carry over.
    pub fn renewed(&self, pair: TokenPair, now: DateTime<Utc>) -> Self {
        let mut renewed = Self::issued(pair, now);
        if renewed.refresh_token.is_none() {
            renewed.refresh_token = self.refresh_token.clone();
        }
        if renewed.provider_account_id.is_none() {
            renewed.provider_account_id = self.provider_account_id.clone();
        }
        if renewed.scopes.is_empty() {
            renewed.scopes = self.scopes.clone();
        }
        renewed.metadata = self.metadata.clone();
        renewed
    }
}

/// Lifecycle state of a credential relative to a [`RenewalPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Young enough to use as-is.
    Active,
    /// Past the soft threshold (or close to its declared expiry); refresh before use.
    Stale,
    /// Past the hard threshold or its declared expiry; must not be used.
    Expired,
    /// Revoked; must not be used.
    Revoked,
}

/// Token material handed to a provider operation.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub access_token: SecretString,
    pub provider_account_id: Option<String>,
}

/// A credential loaded for one `(account_id, provider_id)` key.
#[derive(Debug, Clone)]
pub struct Credential {
    account_id: String,
    provider_id: String,
    record: TokenRecord,
    revoked: bool,
}

impl Credential {
    pub fn new(account_id: &str, provider_id: &str, record: TokenRecord) -> Self {
        Self {
            account_id: account_id.to_string(),
            provider_id: provider_id.to_string(),
            record,
            revoked: false,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn record(&self) -> &TokenRecord {
        &self.record
    }

    pub fn into_record(self) -> TokenRecord {
        self.record
    }

    pub fn access_token(&self) -> &SecretString {
        &self.record.access_token
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.record.refresh_token.as_ref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.record.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.record.expires_at
    }

    pub fn provider_account_id(&self) -> Option<&str> {
        self.record.provider_account_id.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.record.metadata
    }

    /// Whole days since issuance. A record issued in the future counts as age 0.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.record.issued_at).num_days().max(0)
    }

    /// True if the provider-declared expiry has already passed.
    pub fn is_past_declared_expiry(&self, now: DateTime<Utc>) -> bool {
        self.record
            .expires_at
            .is_some_and(|expires_at| expires_at <= now)
    }

    /// Evaluate the credential against `policy`.
    ///
    /// A passed provider-declared expiry wins over the day count.
    pub fn state(&self, policy: &RenewalPolicy, now: DateTime<Utc>) -> CredentialState {
        if self.revoked {
            return CredentialState::Revoked;
        }
        if self.is_past_declared_expiry(now) {
            return CredentialState::Expired;
        }

        let age = self.age_days(now);
        if age >= policy.hard_threshold_days {
            return CredentialState::Expired;
        }
        if age >= policy.soft_threshold_days {
            return CredentialState::Stale;
        }

        let expiring_soon = self
            .record
            .expires_at
            .is_some_and(|expires_at| expires_at - policy.expiry_skew <= now);
        if expiring_soon {
            CredentialState::Stale
        } else {
            CredentialState::Active
        }
    }

    /// True if `token` is the access token this credential carries.
    pub fn holds_access_token(&self, token: &SecretString) -> bool {
        self.record.access_token.expose_secret() == token.expose_secret()
    }

    pub fn mark_revoked(&mut self) {
        self.revoked = true;
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Token material for a provider call. Fails fast once revoked.
    pub fn access(&self) -> Result<AccessContext, Error> {
        if self.revoked {
            return Err(credential_error(
                CredentialErrorKind::CredentialRevoked,
                &format!(
                    "Credential for {}/{} has been revoked",
                    self.account_id, self.provider_id
                ),
            ));
        }

        Ok(AccessContext {
            access_token: self.record.access_token.clone(),
            provider_account_id: self.record.provider_account_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::error::ErrorKind;

    fn record(
        now: DateTime<Utc>,
        issued_days_ago: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> TokenRecord {
        TokenRecord {
            access_token: SecretString::new("access".to_string()),
            refresh_token: Some(SecretString::new("refresh".to_string())),
            issued_at: now - Duration::days(issued_days_ago),
            expires_at,
            provider_account_id: Some("merchant-1".to_string()),
            scopes: vec![],
            metadata: HashMap::new(),
        }
    }

    fn pair(access: &str, refresh: Option<&str>) -> TokenPair {
        TokenPair {
            access_token: SecretString::new(access.to_string()),
            refresh_token: refresh.map(|r| SecretString::new(r.to_string())),
            expires_at: None,
            provider_account_id: None,
            scopes: vec![],
        }
    }

    #[test]
    fn test_state_follows_age_thresholds() {
        let policy = RenewalPolicy::default();
        let now = Utc::now();

        let young = Credential::new("acct", "square", record(now, 3, None));
        assert_eq!(young.state(&policy, now), CredentialState::Active);

        let at_soft = Credential::new("acct", "square", record(now, 20, None));
        assert_eq!(at_soft.state(&policy, now), CredentialState::Stale);

        let stale = Credential::new("acct", "square", record(now, 25, None));
        assert_eq!(stale.state(&policy, now), CredentialState::Stale);

        let at_hard = Credential::new("acct", "square", record(now, 30, None));
        assert_eq!(at_hard.state(&policy, now), CredentialState::Expired);
    }

    #[test]
    fn test_declared_expiry_overrides_age() {
        let policy = RenewalPolicy::default();
        let now = Utc::now();
        let credential = Credential::new(
            "acct",
            "square",
            record(now, 2, Some(now - Duration::hours(1))),
        );

        assert_eq!(credential.state(&policy, now), CredentialState::Expired);
    }

    #[test]
    fn test_expiring_soon_is_stale() {
        let policy = RenewalPolicy::default();
        let now = Utc::now();
        let credential = Credential::new(
            "acct",
            "zoom",
            record(now, 0, Some(now + Duration::minutes(2))),
        );

        assert_eq!(credential.state(&policy, now), CredentialState::Stale);
    }

    #[test]
    fn test_future_issuance_counts_as_age_zero() {
        let now = Utc::now();
        let credential = Credential::new("acct", "square", record(now, -3, None));
        assert_eq!(credential.age_days(now), 0);
    }

    #[test]
    fn test_revoked_credential_fails_fast() {
        let now = Utc::now();
        let mut credential = Credential::new("acct", "square", record(now, 1, None));
        assert!(credential.access().is_ok());

        credential.mark_revoked();
        assert_eq!(
            credential.state(&RenewalPolicy::default(), now),
            CredentialState::Revoked
        );
        let err = credential.access().unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Credential(CredentialErrorKind::CredentialRevoked)
        );
    }

    #[test]
    fn test_issued_drops_expiry_before_issuance() {
        let now = Utc::now();
        let mut stale_pair = pair("a", Some("r"));
        stale_pair.expires_at = Some(now - Duration::seconds(1));

        let record = TokenRecord::issued(stale_pair, now);
        assert_eq!(record.issued_at, now);
        assert!(record.expires_at.is_none());
    }

    #[test]
    fn test_renewed_keeps_non_rotated_refresh_token_and_metadata() {
        let now = Utc::now();
        let mut previous = record(now, 25, None);
        previous
            .metadata
            .insert("currency".to_string(), "USD".to_string());

        let renewed = previous.renewed(pair("new-access", None), now);
        assert_eq!(renewed.access_token.expose_secret(), "new-access");
        assert_eq!(
            renewed.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("refresh")
        );
        assert_eq!(renewed.provider_account_id.as_deref(), Some("merchant-1"));
        assert_eq!(renewed.metadata.get("currency").map(String::as_str), Some("USD"));
        assert_eq!(renewed.issued_at, now);
    }

    #[test]
    fn test_renewed_takes_rotated_refresh_token() {
        let now = Utc::now();
        let previous = record(now, 25, None);
        let renewed = previous.renewed(pair("new-access", Some("new-refresh")), now);
        assert_eq!(
            renewed.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("new-refresh")
        );
    }
}
