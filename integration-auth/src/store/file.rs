//! JSON file token storage with secrets sealed at rest.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{record_key, Storage, TokenCipher};
use crate::credential::TokenRecord;
use crate::error::Error;

/// On-disk shape of a record. Token fields hold sealed (encrypted) values.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    access_token: String,
    refresh_token: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    provider_account_id: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Token storage persisted to a single JSON document.
///
/// Writes go to a sibling temp file that is synced and then renamed over the
/// document, so a crash never leaves a half-written record set behind.
pub struct FileStorage {
    path: PathBuf,
    cipher: TokenCipher,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>, cipher: TokenCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, StoredRecord>, Error> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, records: &BTreeMap<String, StoredRecord>) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp_path = self.path.with_extension("tmp");

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!("Wrote {} token record(s) to {}", records.len(), self.path.display());
        Ok(())
    }

    fn seal(&self, record: TokenRecord) -> Result<StoredRecord, Error> {
        Ok(StoredRecord {
            access_token: self.cipher.seal(record.access_token.expose_secret())?,
            refresh_token: record
                .refresh_token
                .as_ref()
                .map(|token| self.cipher.seal(token.expose_secret()))
                .transpose()?,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            provider_account_id: record.provider_account_id,
            scopes: record.scopes,
            metadata: record.metadata,
        })
    }

    fn open(&self, stored: StoredRecord) -> Result<TokenRecord, Error> {
        Ok(TokenRecord {
            access_token: SecretString::new(self.cipher.open(&stored.access_token)?),
            refresh_token: stored
                .refresh_token
                .as_deref()
                .map(|sealed| self.cipher.open(sealed).map(SecretString::new))
                .transpose()?,
            issued_at: stored.issued_at,
            expires_at: stored.expires_at,
            provider_account_id: stored.provider_account_id,
            scopes: stored.scopes,
            metadata: stored.metadata,
        })
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self, account_id: &str, provider_id: &str) -> Result<Option<TokenRecord>, Error> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;

        records
            .remove(&record_key(account_id, provider_id))
            .map(|stored| self.open(stored))
            .transpose()
    }

    async fn save(
        &self,
        account_id: &str,
        provider_id: &str,
        record: TokenRecord,
    ) -> Result<(), Error> {
        let stored = self.seal(record)?;

        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        records.insert(record_key(account_id, provider_id), stored);
        self.write_all(&records).await
    }

    async fn delete(&self, account_id: &str, provider_id: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;

        if records.remove(&record_key(account_id, provider_id)).is_none() {
            return Ok(());
        }
        self.write_all(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn storage(dir: &tempfile::TempDir) -> FileStorage {
        FileStorage::new(
            dir.path().join("tokens.json"),
            TokenCipher::from_hex(TEST_KEY).unwrap(),
        )
    }

    fn record() -> TokenRecord {
        let mut metadata = HashMap::new();
        metadata.insert("currency".to_string(), "CAD".to_string());
        TokenRecord {
            access_token: SecretString::new("plain-access".to_string()),
            refresh_token: Some(SecretString::new("plain-refresh".to_string())),
            issued_at: Utc::now(),
            expires_at: Some(Utc::now() + Duration::days(30)),
            provider_account_id: Some("ML7Q0KQ3".to_string()),
            scopes: vec!["PAYMENTS_READ".to_string()],
            metadata,
        }
    }

    #[tokio::test]
    async fn test_load_from_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        assert!(storage.load("acct-1", "square").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saved_record_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        storage(&dir)
            .save("acct-1", "square", record())
            .await
            .unwrap();

        let loaded = storage(&dir)
            .load("acct-1", "square")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.access_token.expose_secret(), "plain-access");
        assert_eq!(
            loaded.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("plain-refresh")
        );
        assert_eq!(loaded.provider_account_id.as_deref(), Some("ML7Q0KQ3"));
        assert_eq!(loaded.metadata.get("currency").map(String::as_str), Some("CAD"));
    }

    #[tokio::test]
    async fn test_secrets_are_not_written_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        storage.save("acct-1", "square", record()).await.unwrap();

        let contents = tokio::fs::read_to_string(storage.path()).await.unwrap();
        assert!(!contents.contains("plain-access"));
        assert!(!contents.contains("plain-refresh"));
        assert!(contents.contains("acct-1:square"));
    }

    #[tokio::test]
    async fn test_delete_keeps_other_records() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        storage.save("acct-1", "square", record()).await.unwrap();
        storage.save("acct-1", "zoom", record()).await.unwrap();

        storage.delete("acct-1", "square").await.unwrap();
        storage.delete("acct-1", "square").await.unwrap();

        assert!(storage.load("acct-1", "square").await.unwrap().is_none());
        assert!(storage.load("acct-1", "zoom").await.unwrap().is_some());
    }
}
