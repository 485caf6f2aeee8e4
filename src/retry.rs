//! Generic retry-with-backoff for transient faults.
//!
//! Every external I/O and LLM call in the crate routes through
//! [`retry_with_backoff`]. An error decides its own retryability at the
//! throw site via the [`Retryable`] trait rather than by string-matching
//! on a caught exception, per the crate's design notes.

use std::time::Duration;

use rand::Rng;
use tracing::{instrument, warn};

/// Implemented by error types that can tell whether a given instance is
/// worth retrying. Kept as a trait (not a concrete marker type) so
/// adapters can mix retryable and non-retryable variants in one enum.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Per-call-site retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// `delay_i = min(max_delay, base_delay * 2^(i-1)) * (1 + U[0,1))`, for
    /// the i-th retry attempt (1-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = 1.0 + rand::rng().random::<f64>();
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Re-invoke `op` up to `config.max_attempts` times while it fails with a
/// [`Retryable`]-positive error. Non-retryable errors propagate
/// immediately without delay.
#[instrument(skip(op), fields(max_attempts = config.max_attempts))]
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_attempts && err.is_retryable() => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);
    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky({})", self.0)
        }
    }
    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let result: Result<u32, Flaky> = retry_with_backoff(config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Flaky(true))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<u32, Flaky> = retry_with_backoff(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(Flaky(false)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let result: Result<u32, Flaky> = retry_with_backoff(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(Flaky(true)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
