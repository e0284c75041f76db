// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Fetches retry transient failures a bounded number of times. Errors the
//! predicate rejects (auth, validation) fail on the first attempt.
//!
//! # Example
//!
//! ```
//! use query_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Query: 3 retries, 1s doubling up to 30s
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, Some(3));
//! assert_eq!(query.delay_for(2), Duration::from_secs(4));
//!
//! // Mutations are never retried
//! assert_eq!(RetryConfig::none().max_retries, Some(0));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff policy. `max_retries` counts retries after the first attempt;
/// `None` retries forever.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Query-cache default: 3 retries, delay doubling from 1s, capped at 30s.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: Some(0),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[must_use]
    pub fn fast(max_retries: usize) -> Self {
        Self {
            max_retries: Some(max_retries),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let scaled = self.initial_delay.mul_f64(self.factor.powi(retry as i32));
        scaled.min(self.max_delay)
    }
}

/// Retry `operation` on every error.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Retry `operation` while `should_retry` accepts the error and the budget
/// allows it.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut retries = 0usize;

    loop {
        match operation().await {
            Ok(val) => {
                if retries > 0 {
                    info!(operation = operation_name, retries, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }
                if let Some(max) = config.max_retries {
                    if retries >= max {
                        return Err(err);
                    }
                }
                retries += 1;
                crate::metrics::record_retry(operation_name);

                match config.max_retries {
                    Some(max) => warn!(
                        "Operation '{}' failed (retry {}/{}): {}. Retrying in {:?}...",
                        operation_name, retries, max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (retry {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, retries, err, delay
                    ),
                }

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        message: String,
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    fn transient(message: &str) -> TestError {
        TestError { message: message.to_string(), transient: true }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> =
            retry("test_op", &RetryConfig::fast(3), || async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &RetryConfig::fast(3), || {
            let a = attempts_clone.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(transient(&format!("fail {}", count)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &RetryConfig::fast(3), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(transient("always fail"))
            }
        })
        .await;

        assert!(result.unwrap_err().message.contains("always fail"));
        // first attempt + 3 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_if_stops_on_permanent_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry_if(
            "test_op",
            &RetryConfig::fast(5),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError { message: "401".into(), transient: false })
                }
            },
            |e| e.transient,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_config_runs_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let _: Result<(), TestError> = retry("test_op", &RetryConfig::none(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(transient("down"))
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            max_retries: Some(2),
        };
        let start = tokio::time::Instant::now();

        let _: Result<(), TestError> =
            retry("test_op", &config, || async { Err(transient("down")) }).await;

        // 100ms + 200ms
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            max_retries: Some(5),
        };

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 10.0, // Aggressive factor
            max_retries: Some(5),
        };

        assert_eq!(config.delay_for(1), Duration::from_secs(5));
    }
}
