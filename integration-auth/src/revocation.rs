//! Local teardown of a connected integration.

use std::fmt;
use std::sync::Arc;

use log::*;

use crate::cache::{cache_key, Cache};
use crate::error::Error;
use crate::store::Storage;

/// Why a credential is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// The account owner disconnected the integration.
    Explicit,
    /// The credential passed its hard expiry.
    HardExpiry,
    /// The provider refused the refresh token.
    RefreshRejected,
    /// The provider still rejected the access token after a forced refresh.
    UnauthorizedAfterRefresh,
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            RevocationReason::Explicit => "explicit disconnect",
            RevocationReason::HardExpiry => "hard expiry",
            RevocationReason::RefreshRejected => "refresh rejected",
            RevocationReason::UnauthorizedAfterRefresh => "unauthorized after refresh",
        };
        write!(f, "{}", reason)
    }
}

/// Removes every local trace of a credential: the stored record and the
/// cached settings derived from it.
///
/// Running the cascade for a key that has nothing left to remove succeeds.
pub struct RevocationCascade<S: Storage, C: Cache> {
    storage: Arc<S>,
    cache: Arc<C>,
}

impl<S: Storage, C: Cache> RevocationCascade<S, C> {
    pub fn new(storage: Arc<S>, cache: Arc<C>) -> Self {
        Self { storage, cache }
    }

    pub async fn run(
        &self,
        account_id: &str,
        provider_id: &str,
        reason: RevocationReason,
    ) -> Result<(), Error> {
        warn!(
            "Revoking {} credential for account {} ({})",
            provider_id, account_id, reason
        );

        self.storage.delete(account_id, provider_id).await?;
        self.cache
            .invalidate(&cache_key(account_id, provider_id))
            .await?;

        debug!("Revocation cascade complete for {}/{}", account_id, provider_id);
        Ok(())
    }
}
