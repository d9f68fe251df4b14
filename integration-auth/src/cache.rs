//! Cache of settings derived from a connected integration.
//!
//! Callers cache things like "integration enabled" flags or merchant settings
//! per account and provider. Once a credential is revoked those entries are
//! stale, so the revocation cascade evicts them by [`cache_key`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Error;

/// Cache key for the settings derived from one account's integration.
pub fn cache_key(account_id: &str, provider_id: &str) -> String {
    format!("{}:{}:settings", account_id, provider_id)
}

/// Cache collaborator. The core only ever evicts.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Evict `key`. Evicting an absent key succeeds.
    async fn invalidate(&self, key: &str) -> Result<(), Error>;
}

/// In-process cache of JSON values.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn put(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn invalidate(&self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_deterministic() {
        assert_eq!(cache_key("acct-1", "zoom"), "acct-1:zoom:settings");
        assert_eq!(cache_key("acct-1", "zoom"), cache_key("acct-1", "zoom"));
        assert_ne!(cache_key("acct-1", "zoom"), cache_key("acct-1", "square"));
    }

    #[tokio::test]
    async fn test_invalidate_evicts_only_its_key() {
        let cache = MemoryCache::new();
        cache.put(&cache_key("acct-1", "zoom"), json!({ "enabled": true }));
        cache.put(&cache_key("acct-2", "zoom"), json!({ "enabled": true }));

        cache.invalidate(&cache_key("acct-1", "zoom")).await.unwrap();
        cache.invalidate(&cache_key("acct-1", "zoom")).await.unwrap();

        assert!(cache.get(&cache_key("acct-1", "zoom")).is_none());
        assert_eq!(
            cache.get(&cache_key("acct-2", "zoom")),
            Some(json!({ "enabled": true }))
        );
    }
}
