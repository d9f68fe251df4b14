//! AES-256-GCM sealing of token secrets stored at rest.
//!
//! The key is a 32-byte value provided as a hex-encoded string (64 characters).
//! Sealed values are base64 text: a random 12-byte nonce followed by the ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;

use crate::error::{storage_error, Error, ErrorKind, StorageErrorKind};

/// 12-byte nonce size for AES-GCM
const NONCE_SIZE: usize = 12;

/// Seals and opens token secrets with a single AES-256-GCM key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Parse a hex-encoded 32-byte key.
    pub fn from_hex(key_hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(key_hex.trim()).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
        })?;
        if bytes.len() != 32 {
            return Err(storage_error(
                StorageErrorKind::EncryptionFailed,
                "Token encryption key must be 32 bytes (64 hex characters)",
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| {
            storage_error(StorageErrorKind::EncryptionFailed, "Invalid key length")
        })?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String, Error> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| storage_error(StorageErrorKind::EncryptionFailed, "Sealing failed"))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a value produced by [`TokenCipher::seal`].
    pub fn open(&self, sealed: &str) -> Result<String, Error> {
        let combined = BASE64.decode(sealed).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(storage_error(
                StorageErrorKind::DecryptionFailed,
                "Sealed value is missing its nonce",
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                storage_error(
                    StorageErrorKind::DecryptionFailed,
                    "Data may be corrupted or the key is incorrect",
                )
            })?;

        String::from_utf8(plaintext).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn decryption_failed(result: Result<String, Error>) -> bool {
        matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
                ..
            })
        )
    }

    #[test]
    fn test_seal_then_open() {
        let cipher = TokenCipher::from_hex(TEST_KEY).unwrap();
        let sealed = cipher.seal("EAAAEO-access-token").unwrap();
        assert_ne!(sealed, "EAAAEO-access-token");
        assert_eq!(cipher.open(&sealed).unwrap(), "EAAAEO-access-token");
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let cipher = TokenCipher::from_hex(TEST_KEY).unwrap();
        let first = cipher.seal("refresh").unwrap();
        let second = cipher.seal("refresh").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_short_key_rejected() {
        let result = TokenCipher::from_hex("abcd");
        assert!(matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_key_cannot_open() {
        let sealed = TokenCipher::from_hex(TEST_KEY).unwrap().seal("secret").unwrap();
        let other = TokenCipher::from_hex(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();
        assert!(decryption_failed(other.open(&sealed)));
    }

    #[test]
    fn test_corrupted_values_cannot_open() {
        let cipher = TokenCipher::from_hex(TEST_KEY).unwrap();
        assert!(decryption_failed(cipher.open("not_valid_base64!!!")));
        assert!(decryption_failed(cipher.open("YWJj")));
    }
}
