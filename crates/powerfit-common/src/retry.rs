//! Retry and timeout utilities.
//!
//! [`retry_if`] re-runs an operation with exponential backoff for as long as its
//! failures are judged transient. [`with_timeout`] bounds a single run.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single wait, before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
    /// Stretch each wait by up to a quarter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Wait before `attempt` (1-indexed). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retries) = attempt.checked_sub(2) else {
            return Duration::ZERO;
        };

        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let ceiling = self.max_delay.as_secs_f64();
        let capped = if secs.is_finite() {
            Duration::from_secs_f64(secs.clamp(0.0, ceiling))
        } else {
            self.max_delay
        };

        if self.jitter {
            capped + capped.mul_f64(jitter_fraction() / 4.0)
        } else {
            capped
        }
    }
}

/// A value in `[0, 1)` taken from the clock's sub-second part.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / 1_000_000_000.0
}

/// Run `operation` until it succeeds, fails with an error `retryable` rejects, or the
/// attempts run out. The last error is returned.
pub async fn retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if attempt >= attempts || !retryable(&error) {
            warn!(attempt, attempts, error = %error, "Giving up");
            return Err(error);
        }

        let delay = config.delay_for_attempt(attempt + 1);
        debug!(attempt, ?delay, error = %error, "Attempt failed, retrying");
        sleep(delay).await;
    }
}

/// Run an operation with a timeout.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> crate::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation())
        .await
        .map_err(|_| crate::ShellError::Timeout(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_delays_grow_then_cap() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            jitter: false,
            ..Default::default()
        };

        let delays: Vec<u64> = (0..=5)
            .map(|attempt| config.delay_for_attempt(attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![0, 0, 1, 2, 3, 3]);
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(400),
            jitter: true,
            ..Default::default()
        };
        for _ in 0..20 {
            let delay = config.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_runaway_multiplier_hits_ceiling() {
        let config = RetryConfig {
            backoff_multiplier: f64::MAX,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(40), config.max_delay);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, String> = retry_if(&fast(3), |_| true, || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 3 {
                    Err(format!("flaky {}", call))
                } else {
                    Ok("installed")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("installed"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_at_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_if(
            &fast(5),
            |e: &String| !e.contains("404"),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("404 for /manifest.json".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_error_is_returned() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_if(&fast(2), |_| true, || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("attempt {}", call)) }
        })
        .await;

        assert_eq!(result, Err("attempt 2".to_string()));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let _: Result<(), &str> = retry_if(&fast(0), |_| true, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let quick = with_timeout(Duration::from_secs(1), || async { 7 }).await;
        assert_eq!(quick.ok(), Some(7));

        let slow = with_timeout(Duration::from_millis(10), || {
            sleep(Duration::from_secs(5))
        })
        .await;
        assert!(matches!(slow, Err(crate::ShellError::Timeout(_))));
    }
}
