//! Age based renewal policy.

use chrono::Duration;

/// Default number of days after issuance at which a credential is refreshed.
pub const DEFAULT_SOFT_THRESHOLD_DAYS: i64 = 20;
/// Default number of days after issuance at which a credential is no longer used.
pub const DEFAULT_HARD_THRESHOLD_DAYS: i64 = 30;
/// Default window before a provider-declared expiry in which a refresh is attempted.
pub const DEFAULT_EXPIRY_SKEW_MINUTES: i64 = 5;

/// Thresholds deciding whether a credential is used as-is, refreshed first, or dropped.
///
/// Ages are measured in whole days since the pair was last issued, matching the
/// renewal windows providers document for their long-lived tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub soft_threshold_days: i64,
    pub hard_threshold_days: i64,
    pub expiry_skew: Duration,
}

impl RenewalPolicy {
    /// Create a policy with explicit day thresholds and the default expiry skew.
    ///
    /// A hard threshold that is not above the soft threshold is raised to
    /// `soft + 1` so the refresh window is never empty.
    pub fn new(soft_threshold_days: i64, hard_threshold_days: i64) -> Self {
        let soft_threshold_days = soft_threshold_days.max(0);
        Self {
            soft_threshold_days,
            hard_threshold_days: hard_threshold_days.max(soft_threshold_days + 1),
            expiry_skew: Duration::minutes(DEFAULT_EXPIRY_SKEW_MINUTES),
        }
    }

    pub fn with_expiry_skew(mut self, expiry_skew: Duration) -> Self {
        self.expiry_skew = expiry_skew;
        self
    }
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_THRESHOLD_DAYS, DEFAULT_HARD_THRESHOLD_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let policy = RenewalPolicy::default();
        assert_eq!(policy.soft_threshold_days, 20);
        assert_eq!(policy.hard_threshold_days, 30);
        assert_eq!(policy.expiry_skew, Duration::minutes(5));
    }

    #[test]
    fn test_hard_threshold_kept_above_soft() {
        let policy = RenewalPolicy::new(10, 5);
        assert_eq!(policy.soft_threshold_days, 10);
        assert_eq!(policy.hard_threshold_days, 11);
    }
}
