//! Global request budget for the upstream platform.
//!
//! Every outbound call, including retries, goes through [`RateLimiter::acquire`].
//! Two constraints are enforced together: a minimum gap since the previous
//! request, and at most `max_per_window` requests in any trailing window.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Added on top of the computed wait so the oldest entry has surely expired.
const WINDOW_SLACK: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct LimiterState {
    requests: VecDeque<Instant>,
    last_request: Option<Instant>,
}

impl LimiterState {
    fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.requests.front() {
            if now.duration_since(oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    pub requests_in_window: usize,
    pub max_per_window: usize,
    pub min_delay_ms: u64,
    pub remaining_capacity: usize,
}

pub struct RateLimiter {
    max_per_window: usize,
    min_delay: Duration,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Limiter over the standard 60 second window.
    #[must_use]
    pub fn new(max_per_minute: u32, min_delay: Duration) -> Self {
        Self::with_window(max_per_minute, min_delay, WINDOW)
    }

    #[must_use]
    pub fn with_window(max_per_window: u32, min_delay: Duration, window: Duration) -> Self {
        Self {
            max_per_window: (max_per_window as usize).max(1),
            min_delay,
            window,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Waits until one more request is allowed, records it and returns the
    /// recorded instant.
    ///
    /// The state lock is held across the waits, so concurrent callers queue up
    /// behind each other and the check-then-record step is atomic.
    pub async fn acquire(&self) -> Instant {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_request {
            let since = Instant::now().duration_since(last);
            if since < self.min_delay {
                sleep(self.min_delay - since).await;
            }
        }

        loop {
            let now = Instant::now();
            state.purge(now, self.window);

            if state.requests.len() < self.max_per_window {
                break;
            }

            let Some(&oldest) = state.requests.front() else {
                break;
            };

            let wait = self.window.saturating_sub(now.duration_since(oldest)) + WINDOW_SLACK;
            debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                in_window = state.requests.len(),
                "Rate limit reached, waiting"
            );
            metrics::counter!("platform_rate_limit_waits_total").increment(1);
            sleep(wait).await;
        }

        let now = Instant::now();
        state.requests.push_back(now);
        state.last_request = Some(now);

        metrics::counter!("platform_requests_total").increment(1);
        now
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().await;
        state.purge(Instant::now(), self.window);

        let in_window = state.requests.len();
        RateLimiterStats {
            requests_in_window: in_window,
            max_per_window: self.max_per_window,
            min_delay_ms: u64::try_from(self.min_delay.as_millis()).unwrap_or(u64::MAX),
            remaining_capacity: self.max_per_window.saturating_sub(in_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_min_delay_between_requests() {
        let limiter = RateLimiter::new(100, Duration::from_millis(500));

        let first = limiter.acquire().await;
        let second = limiter.acquire().await;
        let third = limiter.acquire().await;

        assert!(second.duration_since(first) >= Duration::from_millis(500));
        assert!(third.duration_since(second) >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(10, Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_cap_holds_under_concurrency() {
        const CAP: usize = 5;
        let limiter = Arc::new(RateLimiter::new(CAP as u32, Duration::ZERO));

        let delays: Vec<u64> = {
            let mut rng = rand::rng();
            (0..17).map(|_| rng.random_range(0..90_000)).collect()
        };

        let handles: Vec<_> = delays
            .into_iter()
            .map(|delay_ms| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    sleep(Duration::from_millis(delay_ms)).await;
                    limiter.acquire().await
                })
            })
            .collect();

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(CAP + 1) {
            let span = pair[CAP].duration_since(pair[0]);
            assert!(
                span >= WINDOW,
                "{} requests within {:?}",
                CAP + 1,
                span
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new(2, Duration::ZERO);

        let first = limiter.acquire().await;
        limiter.acquire().await;
        let third = limiter.acquire().await;

        assert!(third.duration_since(first) >= WINDOW + WINDOW_SLACK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_millis(250));
        limiter.acquire().await;
        limiter.acquire().await;

        let stats = limiter.stats().await;
        assert_eq!(stats.requests_in_window, 2);
        assert_eq!(stats.remaining_capacity, 1);
        assert_eq!(stats.min_delay_ms, 250);

        tokio::time::advance(WINDOW).await;
        assert_eq!(limiter.stats().await.remaining_capacity, 3);
    }
}
