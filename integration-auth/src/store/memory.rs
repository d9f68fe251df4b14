//! In-process token storage.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{record_key, Storage};
use crate::credential::TokenRecord;
use crate::error::Error;

/// Token storage backed by a concurrent map. Records do not survive a restart.
#[derive(Default)]
pub struct MemoryStorage {
    records: DashMap<String, TokenRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self, account_id: &str, provider_id: &str) -> Result<Option<TokenRecord>, Error> {
        Ok(self
            .records
            .get(&record_key(account_id, provider_id))
            .map(|entry| entry.value().clone()))
    }

    async fn save(
        &self,
        account_id: &str,
        provider_id: &str,
        record: TokenRecord,
    ) -> Result<(), Error> {
        self.records
            .insert(record_key(account_id, provider_id), record);
        Ok(())
    }

    async fn delete(&self, account_id: &str, provider_id: &str) -> Result<(), Error> {
        self.records.remove(&record_key(account_id, provider_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use secrecy::SecretString;
    use std::collections::HashMap;

    fn record() -> TokenRecord {
        TokenRecord {
            access_token: SecretString::new("access".to_string()),
            refresh_token: Some(SecretString::new("refresh".to_string())),
            issued_at: Utc::now(),
            expires_at: None,
            provider_account_id: None,
            scopes: vec![],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let storage = MemoryStorage::new();
        storage.save("acct-1", "square", record()).await.unwrap();

        assert!(storage.load("acct-1", "square").await.unwrap().is_some());
        assert!(storage.load("acct-1", "zoom").await.unwrap().is_none());
        assert!(storage.load("acct-2", "square").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.save("acct-1", "square", record()).await.unwrap();

        storage.delete("acct-1", "square").await.unwrap();
        storage.delete("acct-1", "square").await.unwrap();
        assert!(storage.is_empty());
    }
}
