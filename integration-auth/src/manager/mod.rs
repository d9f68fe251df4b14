//! Credential manager with per-key refresh locking.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use log::*;
use secrecy::ExposeSecret;
use tokio::sync::Mutex;

use crate::cache::{cache_key, Cache};
use crate::credential::{AccessContext, Credential, CredentialState, RenewalPolicy, TokenRecord};
use crate::error::{credential_error, CredentialErrorKind, Error, ErrorKind};
use crate::oauth::{AuthorizationRequest, CallbackParams, Pkce, StateManager};
use crate::provider::{Provider, ProviderRegistry, ResourceRequest, ResourceResponse};
use crate::revocation::{RevocationCascade, RevocationReason};
use crate::store::{record_key, Storage};


/// Manager-wide settings.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Thresholds for providers that do not declare their own.
    pub policy: RenewalPolicy,
    /// Upper bound on every provider call made by the manager.
    pub provider_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            policy: RenewalPolicy::default(),
            provider_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the lifecycle of delegated credentials: acquisition, age based renewal,
/// retry-once on rejected tokens and revocation.
///
/// Refreshes are serialized per `(account_id, provider_id)`. Providers commonly
/// invalidate the previous refresh token on every refresh, so two concurrent
/// refreshes for the same key would strand one caller with a dead token. The
/// second caller waits on the lock, reloads, and uses the first caller's result.
pub struct CredentialManager<S: Storage, C: Cache> {
    storage: Arc<S>,
    cache: Arc<C>,
    cascade: RevocationCascade<S, C>,
    providers: ProviderRegistry,
    states: StateManager,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    config: ManagerConfig,
}

impl<S: Storage, C: Cache> CredentialManager<S, C> {
    pub fn new(
        storage: Arc<S>,
        cache: Arc<C>,
        providers: ProviderRegistry,
        config: ManagerConfig,
    ) -> Self {
        Self {
            cascade: RevocationCascade::new(storage.clone(), cache.clone()),
            storage,
            cache,
            providers,
            states: StateManager::new(),
            refresh_locks: DashMap::new(),
            config,
        }
    }

    /// Replace the state manager, e.g. to change the authorization TTL.
    pub fn with_state_manager(mut self, states: StateManager) -> Self {
        self.states = states;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Thresholds applied to credentials of `provider_id`.
    pub fn policy_for(&self, provider_id: &str) -> Result<RenewalPolicy, Error> {
        let provider = self.providers.get(provider_id)?;
        Ok(self.policy(provider.as_ref()))
    }

    /// The stored credential, without any freshness handling.
    pub async fn credential(
        &self,
        account_id: &str,
        provider_id: &str,
    ) -> Result<Option<Credential>, Error> {
        Ok(self
            .storage
            .load(account_id, provider_id)
            .await?
            .map(|record| Credential::new(account_id, provider_id, record)))
    }

    /// The stored credential and its state under the provider's policy.
    pub async fn status(
        &self,
        account_id: &str,
        provider_id: &str,
    ) -> Result<Option<(Credential, CredentialState)>, Error> {
        let policy = self.policy_for(provider_id)?;
        let now = Utc::now();
        Ok(self
            .credential(account_id, provider_id)
            .await?
            .map(|credential| {
                let state = credential.state(&policy, now);
                (credential, state)
            }))
    }

    /// Return a credential that is safe to use now, refreshing it first if it is stale.
    ///
    /// # Returns
    ///
    /// * the stored credential when it is younger than the soft threshold
    /// * a refreshed and persisted credential when it is stale
    /// * `CredentialExpired` once the hard threshold or the declared expiry has
    ///   passed, or when the provider rejects the refresh token; the cascade has run
    /// * `NoCredential` when the account never connected
    ///
    /// A stale credential whose refresh fails transiently is still inside its
    /// hard window and is returned as-is.
    pub async fn ensure_fresh(
        &self,
        account_id: &str,
        provider_id: &str,
    ) -> Result<Credential, Error> {
        let provider = self.providers.get(provider_id)?;
        let policy = self.policy(provider.as_ref());

        let mut credential = self.load_required(account_id, provider_id).await?;
        match credential.state(&policy, Utc::now()) {
            CredentialState::Active => Ok(credential),
            CredentialState::Revoked => Err(revoked_error(&credential)),
            CredentialState::Expired => {
                self.revoke_if_current(&mut credential, RevocationReason::HardExpiry)
                    .await;
                Err(expired_error(&credential))
            }
            CredentialState::Stale => {
                self.renew_stale(provider.as_ref(), credential, &policy)
                    .await
            }
        }
    }

    async fn renew_stale(
        &self,
        provider: &dyn Provider,
        credential: Credential,
        policy: &RenewalPolicy,
    ) -> Result<Credential, Error> {
        let account_id = credential.account_id().to_string();
        let provider_id = credential.provider_id().to_string();

        if credential.refresh_token().is_none() {
            debug!(
                "Stale {} credential for account {} has no refresh token",
                provider_id, account_id
            );
            return Ok(credential);
        }

        let lock = self.refresh_lock(&account_id, &provider_id);
        let _guard = lock.lock().await;

        // Double-check: another caller may have refreshed or revoked while we waited.
        let mut current = self.load_required(&account_id, &provider_id).await?;
        match current.state(policy, Utc::now()) {
            CredentialState::Active => {
                debug!("Credential was refreshed by another request");
                return Ok(current);
            }
            CredentialState::Revoked => return Err(revoked_error(&current)),
            CredentialState::Expired => {
                self.revoke_locked(&mut current, RevocationReason::HardExpiry)
                    .await;
                return Err(expired_error(&current));
            }
            // Tokens living shorter than the expiry skew are stale straight away.
            CredentialState::Stale if !current.holds_access_token(credential.access_token()) => {
                debug!("Credential was refreshed by another request");
                return Ok(current);
            }
            CredentialState::Stale => {}
        }

        match self.refresh_locked(provider, &current).await {
            Ok(refreshed) => Ok(refreshed),
            Err(e) if is_refresh_rejected(&e) => {
                self.revoke_locked(&mut current, RevocationReason::RefreshRejected)
                    .await;
                Err(escalate(CredentialErrorKind::CredentialExpired, e))
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "Refresh of stale {} credential for account {} failed, using it as-is: {}",
                    provider_id, account_id, e
                );
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    /// Run `operation` with a fresh access token, retrying once after a forced
    /// refresh if the provider rejects the token.
    ///
    /// A second rejection, or a rejected forced refresh, runs the revocation
    /// cascade and returns `CredentialRevoked`. Every other error is returned
    /// unchanged without refreshing.
    pub async fn invoke<T, F, Fut>(
        &self,
        account_id: &str,
        provider_id: &str,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(Arc<dyn Provider>, AccessContext) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let provider = self.providers.get(provider_id)?;
        let credential = self.ensure_fresh(account_id, provider_id).await?;

        let error = match self
            .bounded(operation(provider.clone(), credential.access()?))
            .await
        {
            Err(e) if e.is_unauthorized() => e,
            outcome => return outcome,
        };

        info!(
            "{} rejected the access token for account {}, forcing a refresh: {}",
            provider_id, account_id, error
        );

        let mut refreshed = match self.force_refresh(provider.as_ref(), &credential).await {
            Ok(refreshed) => refreshed,
            Err(e) if is_refresh_rejected(&e) => {
                let mut credential = credential;
                self.revoke_if_current(&mut credential, RevocationReason::RefreshRejected)
                    .await;
                return Err(escalate(CredentialErrorKind::CredentialRevoked, e));
            }
            Err(e) => return Err(e),
        };

        match self
            .bounded(operation(provider, refreshed.access()?))
            .await
        {
            Err(e) if e.is_unauthorized() => {
                self.revoke_if_current(&mut refreshed, RevocationReason::UnauthorizedAfterRefresh)
                    .await;
                Err(escalate(CredentialErrorKind::CredentialRevoked, e))
            }
            outcome => outcome,
        }
    }

    /// Call a resource endpoint through [`Self::invoke`].
    pub async fn call(
        &self,
        account_id: &str,
        provider_id: &str,
        request: ResourceRequest,
    ) -> Result<ResourceResponse, Error> {
        self.invoke(account_id, provider_id, |provider, access| {
            let request = request.clone();
            async move {
                provider
                    .call_resource(access.access_token.expose_secret(), request)
                    .await
            }
        })
        .await
    }

    /// Exchange the stored refresh token for a new pair, regardless of age.
    ///
    /// A refresh token the provider refuses yields `RefreshRejected`; the record
    /// is left in place for the caller to revoke.
    pub async fn refresh(&self, account_id: &str, provider_id: &str) -> Result<Credential, Error> {
        let provider = self.providers.get(provider_id)?;

        let lock = self.refresh_lock(account_id, provider_id);
        let _guard = lock.lock().await;

        let current = self.load_required(account_id, provider_id).await?;
        self.refresh_locked(provider.as_ref(), &current).await
    }

    /// Disconnect an integration.
    ///
    /// The provider-side revocation is best effort; local state is always cleared.
    /// Revoking an account with nothing stored succeeds.
    pub async fn revoke(&self, account_id: &str, provider_id: &str) -> Result<(), Error> {
        let provider = self.providers.get(provider_id)?;

        let lock = self.refresh_lock(account_id, provider_id);
        let _guard = lock.lock().await;

        match self.storage.load(account_id, provider_id).await {
            Ok(Some(record)) => {
                let credential = Credential::new(account_id, provider_id, record);
                if let Err(e) = self.bounded(provider.revoke(&credential)).await {
                    warn!(
                        "Remote revocation of {} credential for account {} failed: {}",
                        provider_id, account_id, e
                    );
                }
            }
            Ok(None) => debug!(
                "No {} credential stored for account {}",
                provider_id, account_id
            ),
            Err(e) => warn!(
                "Could not load {} credential for account {} before revoking: {}",
                provider_id, account_id, e
            ),
        }

        self.cascade
            .run(account_id, provider_id, RevocationReason::Explicit)
            .await
    }

    /// Start the authorization-code handshake for an account.
    pub fn begin_authorization(
        &self,
        account_id: &str,
        provider_id: &str,
    ) -> Result<AuthorizationRequest, Error> {
        let provider = self.providers.get(provider_id)?;
        self.states.cleanup_expired();

        let pkce = provider.supports_pkce().then(Pkce::generate);
        let challenge = pkce.as_ref().map(|pkce| pkce.challenge().to_string());
        let state = self
            .states
            .issue(account_id, provider_id, pkce.map(Pkce::into_verifier));
        let url = provider.authorization_url(&state, challenge.as_deref())?;

        debug!(
            "Started {} authorization for account {}",
            provider_id, account_id
        );
        Ok(AuthorizationRequest { url, state })
    }

    /// Complete the handshake: validate `state`, exchange `code` and persist the result.
    ///
    /// Nothing is written unless the exchange succeeds.
    pub async fn exchange(
        &self,
        account_id: &str,
        provider_id: &str,
        code: &str,
        state: &str,
    ) -> Result<Credential, Error> {
        let provider = self.providers.get(provider_id)?;
        let pending = self
            .states
            .consume(state, account_id, provider_id)
            .ok_or_else(|| invalid_state_error(account_id, provider_id))?;

        let pair = self
            .bounded(provider.exchange_code(code, pending.pkce_verifier.as_deref()))
            .await
            .map_err(|e| {
                warn!(
                    "{} code exchange failed for account {}: {}",
                    provider_id, account_id, e
                );
                if e.is_unauthorized() {
                    escalate(CredentialErrorKind::AuthorizationFailed, e)
                } else {
                    e
                }
            })?;

        let mut record = TokenRecord::issued(pair, Utc::now());
        let access = AccessContext {
            access_token: record.access_token.clone(),
            provider_account_id: record.provider_account_id.clone(),
        };
        match self.bounded(provider.account_metadata(&access)).await {
            Ok(metadata) => record.metadata.extend(metadata),
            Err(e) => warn!(
                "Could not read {} account settings for account {}: {}",
                provider_id, account_id, e
            ),
        }

        {
            let lock = self.refresh_lock(account_id, provider_id);
            let _guard = lock.lock().await;
            self.storage
                .save(account_id, provider_id, record.clone())
                .await?;
        }
        if let Err(e) = self
            .cache
            .invalidate(&cache_key(account_id, provider_id))
            .await
        {
            warn!(
                "Could not evict cached {} settings for account {}: {}",
                provider_id, account_id, e
            );
        }

        info!("Connected {} for account {}", provider_id, account_id);
        Ok(Credential::new(account_id, provider_id, record))
    }

    /// Handle the provider's redirect back to the application.
    ///
    /// The state is validated before anything else, including provider errors.
    pub async fn handle_callback(
        &self,
        account_id: &str,
        provider_id: &str,
        params: CallbackParams,
    ) -> Result<Credential, Error> {
        if params.error.is_none() {
            if let Some(code) = params.code.as_deref().filter(|code| !code.is_empty()) {
                return self
                    .exchange(account_id, provider_id, code, &params.state)
                    .await;
            }
        }

        if self
            .states
            .consume(&params.state, account_id, provider_id)
            .is_none()
        {
            return Err(invalid_state_error(account_id, provider_id));
        }

        let description = params.error_description.as_deref().unwrap_or_default();
        match params.error.as_deref() {
            Some(error @ ("access_denied" | "user_denied")) => {
                info!(
                    "Account {} declined {} authorization ({})",
                    account_id, provider_id, error
                );
                Err(credential_error(
                    CredentialErrorKind::AuthorizationDenied,
                    &format!("{}: {}", error, description),
                ))
            }
            Some(error) => {
                warn!(
                    "{} authorization for account {} failed: {} {}",
                    provider_id, account_id, error, description
                );
                Err(credential_error(
                    CredentialErrorKind::AuthorizationFailed,
                    &format!("{}: {}", error, description),
                ))
            }
            None => Err(credential_error(
                CredentialErrorKind::AuthorizationFailed,
                "Callback carried neither a code nor an error",
            )),
        }
    }

    fn policy(&self, provider: &dyn Provider) -> RenewalPolicy {
        provider.renewal_policy().unwrap_or(self.config.policy)
    }

    fn refresh_lock(&self, account_id: &str, provider_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(record_key(account_id, provider_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_required(&self, account_id: &str, provider_id: &str) -> Result<Credential, Error> {
        self.credential(account_id, provider_id)
            .await?
            .ok_or_else(|| {
                credential_error(
                    CredentialErrorKind::NoCredential,
                    &format!("No {} credential for account {}", provider_id, account_id),
                )
            })
    }

    /// Refresh after the provider rejected `failing`'s access token.
    async fn force_refresh(
        &self,
        provider: &dyn Provider,
        failing: &Credential,
    ) -> Result<Credential, Error> {
        let lock = self.refresh_lock(failing.account_id(), failing.provider_id());
        let _guard = lock.lock().await;

        let current = self
            .load_required(failing.account_id(), failing.provider_id())
            .await?;
        if !current.holds_access_token(failing.access_token()) {
            debug!("Rejected token was already replaced by another request");
            return Ok(current);
        }

        self.refresh_locked(provider, &current).await
    }

    /// Exchange `current`'s refresh token and persist the result. The caller holds
    /// the key's refresh lock.
    async fn refresh_locked(
        &self,
        provider: &dyn Provider,
        current: &Credential,
    ) -> Result<Credential, Error> {
        let account_id = current.account_id();
        let provider_id = current.provider_id();

        let refresh_token = current.refresh_token().ok_or_else(|| {
            credential_error(
                CredentialErrorKind::RefreshRejected,
                &format!(
                    "No refresh token stored for {} credential of account {}",
                    provider_id, account_id
                ),
            )
        })?;

        debug!("Refreshing {} credential for account {}", provider_id, account_id);
        let pair = self
            .bounded(provider.refresh(refresh_token.expose_secret()))
            .await
            .map_err(|e| {
                if e.is_unauthorized() {
                    escalate(CredentialErrorKind::RefreshRejected, e)
                } else {
                    e
                }
            })?;

        let record = current.record().renewed(pair, Utc::now());
        // Persist before anyone sees the new token: the old refresh token may
        // already be dead provider-side.
        self.storage
            .save(account_id, provider_id, record.clone())
            .await?;

        info!("Refreshed {} credential for account {}", provider_id, account_id);
        Ok(Credential::new(account_id, provider_id, record))
    }

    /// Revoke `judged` unless the stored record has moved on since it was loaded.
    ///
    /// Runs under the key's refresh lock, so an exchange or refresh that saved a
    /// newer record in the meantime is kept.
    async fn revoke_if_current(&self, judged: &mut Credential, reason: RevocationReason) {
        let lock = self.refresh_lock(judged.account_id(), judged.provider_id());
        let _guard = lock.lock().await;

        let stored = self
            .credential(judged.account_id(), judged.provider_id())
            .await;
        match stored {
            Ok(Some(stored)) if !same_grant(&stored, judged) => {
                info!(
                    "{} credential for account {} was replaced, not revoking it ({})",
                    judged.provider_id(),
                    judged.account_id(),
                    reason
                );
                judged.mark_revoked();
            }
            Ok(_) => self.revoke_locked(judged, reason).await,
            Err(e) => {
                warn!(
                    "Could not reload {} credential for account {} before revoking: {}",
                    judged.provider_id(),
                    judged.account_id(),
                    e
                );
                self.revoke_locked(judged, reason).await;
            }
        }
    }

    /// Run the cascade and mark the in-memory credential revoked. The caller holds
    /// the key's refresh lock.
    ///
    /// A failing cascade is logged; the caller still reports the credential error.
    async fn revoke_locked(&self, credential: &mut Credential, reason: RevocationReason) {
        if let Err(e) = self
            .cascade
            .run(credential.account_id(), credential.provider_id(), reason)
            .await
        {
            error!(
                "Revocation cascade failed for {}/{}: {}",
                credential.account_id(),
                credential.provider_id(),
                e
            );
        }
        credential.mark_revoked();
    }

    async fn bounded<T, Fut>(&self, call: Fut) -> Result<T, Error>
    where
        Fut: Future<Output = Result<T, Error>>,
    {
        tokio::time::timeout(self.config.provider_timeout, call).await?
    }
}

/// True when both credentials come from the same grant or refresh.
fn same_grant(stored: &Credential, judged: &Credential) -> bool {
    stored.holds_access_token(judged.access_token()) && stored.issued_at() == judged.issued_at()
}

fn is_refresh_rejected(error: &Error) -> bool {
    error.error_kind == ErrorKind::Credential(CredentialErrorKind::RefreshRejected)
}

/// Wrap `source` in a credential-class error.
fn escalate(kind: CredentialErrorKind, source: Error) -> Error {
    Error {
        source: Some(Box::new(source)),
        error_kind: ErrorKind::Credential(kind),
    }
}

fn expired_error(credential: &Credential) -> Error {
    credential_error(
        CredentialErrorKind::CredentialExpired,
        &format!(
            "{} credential for account {} has expired",
            credential.provider_id(),
            credential.account_id()
        ),
    )
}

fn revoked_error(credential: &Credential) -> Error {
    credential_error(
        CredentialErrorKind::CredentialRevoked,
        &format!(
            "{} credential for account {} has been revoked",
            credential.provider_id(),
            credential.account_id()
        ),
    )
}

fn invalid_state_error(account_id: &str, provider_id: &str) -> Error {
    warn!(
        "Rejected {} authorization callback for account {}: unknown or expired state",
        provider_id, account_id
    );
    credential_error(
        CredentialErrorKind::InvalidState,
        "Authorization state is unknown, expired or bound to another account",
    )
}
