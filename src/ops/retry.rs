//! Exponential backoff for transient lock contention.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{BackendError, BackendResult, RepoError, RepoResult};

/// Retries `BackendError::Locked` with exponentially growing, jittered delays.
/// Every other error is returned immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, jitter: f64) -> Self {
        Self {
            max_retries,
            initial_backoff,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
            config.jitter,
        )
    }

    /// Fail on the first `Locked` without waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 0.0)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Nominal delay before retry number `attempt` (0-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay before retry number `attempt`, spread by up to `±jitter` of the
    /// nominal delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        // mul_f64 panics past Duration::MAX
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }

    /// Run `attempt` until it succeeds, fails with something other than
    /// `Locked`, or the retry budget is spent.
    ///
    /// Exhaustion surfaces as `RepositoryLocked` carrying the number of retries.
    pub async fn retry_locked<T>(
        &self,
        label: &str,
        mut attempt: impl FnMut() -> BackendResult<T>,
    ) -> RepoResult<T> {
        let mut retries = 0;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(BackendError::Locked { .. }) if retries < self.max_retries => {
                    let delay = self.delay(retries);
                    debug!(
                        label,
                        retry = retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        "repository locked, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(BackendError::Locked { .. }) => {
                    warn!(label, retries, "repository still locked, giving up");
                    return Err(RepoError::RepositoryLocked {
                        label: label.to_string(),
                        attempts: retries,
                    });
                }
                Err(e) => return Err(RepoError::from_backend(label, e)),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn locked() -> BackendError {
        BackendError::Locked {
            label: "ENTITIES_test".into(),
            limit: 1,
        }
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), 0.0);
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(16));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000), 0.5);
        for _ in 0..100 {
            let d = policy.delay(0);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500), "{d:?}");
        }
    }

    #[test]
    fn saturated_delay_does_not_overflow() {
        let policy = RetryPolicy::new(5, Duration::from_millis(u64::MAX), 0.5);
        assert_eq!(policy.base_delay(4), Duration::MAX);
        for _ in 0..20 {
            assert!(policy.delay(4) > Duration::ZERO);
        }
    }

    #[test]
    fn default_matches_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn succeeds_after_transient_locks() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 0.0);
        let calls = Cell::new(0);
        let value = policy
            .retry_locked("ENTITIES_test", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err(locked()) } else { Ok(42) }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), 0.0);
        let calls = Cell::new(0);
        let err = policy
            .retry_locked("ENTITIES_test", || -> BackendResult<()> {
                calls.set(calls.get() + 1);
                Err(locked())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::RepositoryLocked { attempts: 2, .. }));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), 0.0);
        let calls = Cell::new(0);
        let err = policy
            .retry_locked("ENTITIES_test", || -> BackendResult<()> {
                calls.set(calls.get() + 1);
                Err(BackendError::Storage {
                    message: "disk".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Storage { .. }));
        assert_eq!(calls.get(), 1);
    }
}
