//! Exponential backoff for rate-limited ledger RPCs.
//!
//! Only [`EscrowError::RateLimited`] is retried; every other error goes
//! straight back to the caller. The policy holds no state between calls.

use std::{future::Future, time::Duration};

use wagerlock_types::{EscrowError, Result, RetryConfig};

/// Retry a ledger call on rate limits, waiting `base_delay * 2^attempt`
/// between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before retry number `attempt + 1` (attempt counted from 0).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
    }

    /// Run `operation` until it succeeds, fails with a non-rate-limit error,
    /// or the attempt budget is spent (the last error is returned).
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        op = label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Rate limited by ledger, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_rate_limited() {
                        tracing::warn!(op = label, attempts = attempt + 1, "Retry budget exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self::new(cfg.max_attempts, cfg.base_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Shorthand for the error a rate-limited endpoint should produce.
#[must_use]
pub fn rate_limited(reason: impl Into<String>) -> EscrowError {
    EscrowError::RateLimited {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tokio::time::Instant;

    use super::*;

    const BASE: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn two_rate_limits_then_success_waits_twice() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, BASE);
        let start = Instant::now();

        let result = policy
            .run("seqno", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(rate_limited("429")) } else { Ok(42u32) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Exactly two backoff waits: BASE * 2^0 + BASE * 2^1. A third wait
        // would add another BASE * 4.
        let elapsed = start.elapsed();
        assert!(elapsed >= BASE * 3, "elapsed {elapsed:?}");
        assert!(elapsed < BASE * 7, "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, BASE);
        let start = Instant::now();

        let err = policy
            .run("get_game", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(EscrowError::Rpc {
                        reason: "500".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EscrowError::Rpc { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < BASE);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, BASE);

        let err = policy
            .run("send", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(rate_limited("429"))
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(5, BASE);
        assert_eq!(policy.delay_for(0), BASE);
        assert_eq!(policy.delay_for(1), BASE * 2);
        assert_eq!(policy.delay_for(3), BASE * 8);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, BASE).max_attempts(), 1);
    }
}
