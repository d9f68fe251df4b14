//! Token record persistence.

mod encryption;
mod file;
mod memory;

pub use encryption::TokenCipher;
pub use file::FileStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::credential::TokenRecord;
use crate::error::Error;

/// Durable store holding one token record per account and provider.
///
/// The manager never hands out a refreshed token before `save` has returned,
/// so implementations must only return `Ok` once the record is durable.
///
/// Implementations should:
/// - Encrypt secrets at rest
/// - Treat deleting an absent record as success
/// - Handle concurrent access safely
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the current record for an account and provider.
    ///
    /// # Returns
    ///
    /// `Some(TokenRecord)` if found, `None` if the account never connected or was revoked.
    async fn load(&self, account_id: &str, provider_id: &str) -> Result<Option<TokenRecord>, Error>;

    /// Replace the record for an account and provider.
    async fn save(&self, account_id: &str, provider_id: &str, record: TokenRecord)
        -> Result<(), Error>;

    /// Remove the record for an account and provider.
    async fn delete(&self, account_id: &str, provider_id: &str) -> Result<(), Error>;
}

/// Key under which a record is kept in flat key-value backends.
pub(crate) fn record_key(account_id: &str, provider_id: &str) -> String {
    format!("{}:{}", account_id, provider_id)
}
