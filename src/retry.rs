//! Retry policy for C9 (§4.9): attempt budget plus exponential backoff with
//! jitter, parameterized by the condition that triggered the retry.

use std::time::Duration;

use rand::Rng;

/// Why a retry was considered. Both share the same default budget/backoff
/// today; kept distinct because §4.9 names them as separate conditions and
/// a future policy may diverge them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCondition {
    /// Server reported a serialization failure or deadlock inside a `Tx`.
    TxConflict,
    /// Any client-connection error observed during the block.
    NetworkError,
}

/// `(attempts, backoff-fn)` per condition (§4.9). `max_attempts` counts the
/// first try, so `max_attempts == 3` means up to two retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const DEFAULT: Self = Self { max_attempts: 3 };

    /// Whether a further attempt is allowed after `attempt` (1-based) has
    /// failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff to sleep before the `attempt`-th retry (1-based: the sleep
    /// before the second overall try is `backoff(1)`). `100·2^n ms` plus
    /// `uniform[0,100) ms` jitter, per §4.9.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = 100u64.saturating_mul(1u64 << attempt.min(32));
        let jitter_ms: u64 = rand::rng().random_range(0..100);
        Duration::from_millis(base_ms + jitter_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_allows_two_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn backoff_grows_with_attempt_and_includes_jitter() {
        let policy = RetryPolicy::default();
        let b1 = policy.backoff(1).as_millis();
        let b2 = policy.backoff(2).as_millis();
        assert!(b1 >= 200 && b1 < 300);
        assert!(b2 >= 400 && b2 < 500);
    }
}
