// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with a delay schedule.
//!
//! The schedule lists the pause before each retry. When attempts outlast the
//! schedule, its last delay repeats.
//!
//! # Example
//!
//! ```
//! use offline_core::RetryConfig;
//! use std::time::Duration;
//!
//! // Mutation replay: 3 attempts, waiting 1s then 5s between them
//! let replay = RetryConfig::replay();
//! assert_eq!(replay.max_attempts, Some(3));
//! assert_eq!(replay.delay_for(0), Duration::from_secs(1));
//! assert_eq!(replay.delay_for(1), Duration::from_secs(5));
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, Some(5));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for opening local stores
/// - [`RetryConfig::replay()`] - Mutation replay (3 attempts, 1s then 5s apart)
/// - [`RetryConfig::query()`] - Quick retry for individual statements
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first. `None` retries forever.
    pub max_attempts: Option<usize>,
    /// Pause before retry `n` is `schedule[n]`, clamped to the last entry.
    pub schedule: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::replay()
    }
}

impl RetryConfig {
    /// Build from a millisecond schedule, as found in configuration files.
    #[must_use]
    pub fn from_millis(max_attempts: usize, schedule_ms: &[u64]) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            schedule: schedule_ms.iter().copied().map(Duration::from_millis).collect(),
        }
    }

    /// Fast-fail retry for opening local databases at startup.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: Some(5),
            schedule: vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1600),
            ],
        }
    }

    /// Replay of queued mutations against the remote API.
    #[must_use]
    pub fn replay() -> Self {
        Self {
            max_attempts: Some(3),
            schedule: vec![Duration::from_secs(1), Duration::from_secs(5)],
        }
    }

    /// Quick retry for individual statements (don't block forever).
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: Some(3),
            schedule: vec![Duration::from_millis(50), Duration::from_millis(200)],
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: Some(3),
            schedule: vec![Duration::from_millis(1), Duration::from_millis(2)],
        }
    }

    /// Delay before the retry that follows failed attempt `retry_index` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry_index: usize) -> Duration {
        self.schedule
            .get(retry_index)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Run `operation` until it succeeds or attempts run out.
///
/// Every error is retried; callers that want to stop early on a permanent
/// failure return it inside `Ok`.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if let Some(max) = config.max_attempts {
                    if attempts >= max {
                        warn!(operation = operation_name, attempts, error = %err, "Operation failed, attempts exhausted");
                        return Err(err);
                    }
                }

                let delay = config.delay_for(attempts - 1);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts = ?config.max_attempts,
                    error = %err,
                    ?delay,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
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
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || async { Ok(42) },
        ).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(TestError(format!("fail {}", count)))
                    } else {
                        Ok(42)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError("always fail".to_string()))
                }
            },
        ).await;

        assert!(result.unwrap_err().0.contains("always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_follows_schedule() {
        let config = RetryConfig::replay();
        let start = tokio::time::Instant::now();

        let result: Result<(), TestError> = retry(
            "scheduled",
            &config,
            || async { Err(TestError("down".into())) },
        ).await;

        assert!(result.is_err());
        // Two pauses between three attempts: 1s + 5s
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[test]
    fn test_delay_clamps_to_last_entry() {
        let config = RetryConfig::from_millis(10, &[100, 200]);
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(7), Duration::from_millis(200));
    }

    #[test]
    fn test_empty_schedule_means_no_delay() {
        let config = RetryConfig::from_millis(2, &[]);
        assert_eq!(config.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetryConfig::startup().max_attempts, Some(5));
        assert_eq!(RetryConfig::query().max_attempts, Some(3));
        assert_eq!(RetryConfig::default(), RetryConfig::replay());
        assert_eq!(RetryConfig::from_millis(0, &[1]).max_attempts, Some(1));
    }
}
