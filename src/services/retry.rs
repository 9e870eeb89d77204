//! Bounded exponential-backoff retry around single-attempt operations.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::rate_limiter::RateLimiter;
use crate::clients::ConnectorError;

/// Classifies errors the executor may retry.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for ConnectorError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &crate::config::PlatformConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Wait before the attempt following attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Every attempt first acquires `limiter`, so retries count against the
    /// same request budget as first attempts. The outcome is always returned
    /// as a value together with the number of attempts made.
    pub async fn execute<T, E, F, Fut>(
        &self,
        limiter: &RateLimiter,
        label: &str,
        mut op: F,
    ) -> RetryReport<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            limiter.acquire().await;

            match op().await {
                Ok(value) => {
                    return RetryReport {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = self.delay_for(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transient failure, retrying after backoff"
                    );
                    metrics::counter!("platform_retries_total").increment(1);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return RetryReport {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

/// Result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> RetryReport<T, E> {
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(3), Duration::from_secs(8));
        assert_eq!(p.delay_for(5), Duration::from_secs(30));
        assert_eq!(p.delay_for(64), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_stops_at_max_attempts() {
        let limiter = RateLimiter::new(1000, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let report: RetryReport<(), ConnectorError> = policy()
            .execute(&limiter, "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::Transient("boom".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.retries(), 2);
        assert!(report.result.is_err());
        assert_eq!(limiter.stats().await.requests_in_window, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let limiter = RateLimiter::new(1000, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let report: RetryReport<(), ConnectorError> = policy()
            .execute(&limiter, "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::Fatal("forbidden".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let limiter = RateLimiter::new(1000, Duration::ZERO);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let report = policy()
            .execute(&limiter, "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ConnectorError::Transient("timeout".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(report.retries(), 1);
        assert_eq!(report.result.unwrap(), 42);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
