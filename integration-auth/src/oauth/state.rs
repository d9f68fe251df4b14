//! Anti-forgery state for the authorization-code handshake.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;

/// An authorization started for one account and provider, awaiting its callback.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub account_id: String,
    pub provider_id: String,
    /// PKCE verifier to present at code exchange, if PKCE was used.
    pub pkce_verifier: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and consumes single-use state tokens.
///
/// A state is bound to the account and provider it was issued for; presenting
/// it for any other key, after its TTL, or a second time is rejected.
pub struct StateManager {
    pending: DashMap<String, PendingAuthorization>,
    ttl: Duration,
}

impl StateManager {
    /// Create a new state manager with default TTL of 10 minutes.
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(10))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Issue a state token for an authorization about to start.
    pub fn issue(&self, account_id: &str, provider_id: &str, pkce_verifier: Option<String>) -> String {
        let state = Self::generate_token();
        self.pending.insert(
            state.clone(),
            PendingAuthorization {
                account_id: account_id.to_string(),
                provider_id: provider_id.to_string(),
                pkce_verifier,
                expires_at: Utc::now() + self.ttl,
            },
        );
        state
    }

    /// Consume `state`, returning the pending authorization if it is valid for this key.
    pub fn consume(
        &self,
        state: &str,
        account_id: &str,
        provider_id: &str,
    ) -> Option<PendingAuthorization> {
        let (_, pending) = self.pending.remove(state)?;

        if Utc::now() > pending.expires_at {
            return None;
        }
        if pending.account_id != account_id || pending.provider_id != provider_id {
            return None;
        }
        Some(pending)
    }

    /// Drop states whose callback never arrived.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.pending.retain(|_, pending| pending.expires_at > now);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn generate_token() -> String {
        let random_bytes: [u8; 32] = rand::thread_rng().gen();
        hex::encode(random_bytes)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_state() {
        let states = StateManager::new();
        let state = states.issue("acct-1", "square", None);
        assert_eq!(state.len(), 64); // 32 bytes hex encoded
        assert_eq!(states.pending_count(), 1);
    }

    #[test]
    fn test_consume_returns_verifier() {
        let states = StateManager::new();
        let state = states.issue("acct-1", "zoom", Some("verifier".to_string()));

        let pending = states.consume(&state, "acct-1", "zoom").unwrap();
        assert_eq!(pending.pkce_verifier.as_deref(), Some("verifier"));
    }

    #[test]
    fn test_state_is_single_use() {
        let states = StateManager::new();
        let state = states.issue("acct-1", "zoom", None);

        assert!(states.consume(&state, "acct-1", "zoom").is_some());
        assert!(states.consume(&state, "acct-1", "zoom").is_none());
    }

    #[test]
    fn test_state_bound_to_key() {
        let states = StateManager::new();
        let state = states.issue("acct-1", "zoom", None);

        assert!(states.consume(&state, "acct-2", "zoom").is_none());
        // The attempt burns the state.
        assert!(states.consume(&state, "acct-1", "zoom").is_none());
    }

    #[test]
    fn test_unknown_and_expired_states() {
        let states = StateManager::with_ttl(Duration::seconds(-1));
        assert!(states.consume("never-issued", "acct-1", "zoom").is_none());

        let state = states.issue("acct-1", "zoom", None);
        assert!(states.consume(&state, "acct-1", "zoom").is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let states = StateManager::with_ttl(Duration::seconds(-1));
        states.issue("acct-1", "zoom", None);
        states.cleanup_expired();
        assert_eq!(states.pending_count(), 0);
    }
}
