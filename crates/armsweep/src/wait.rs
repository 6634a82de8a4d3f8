//! Resource waiting with exponential backoff and cancellation support.
//!
//! Provides a generic abstraction for polling an ARM operation (or any async
//! condition) until it settles, with configurable exponential backoff, jitter,
//! a deadline, and cancellation.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for resource waiting with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(armsweep_common::defaults::DEFAULT_DELETE_TIMEOUT_SECS),
        }
    }
}

impl WaitConfig {
    /// Same backoff, different deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Why a wait ended without a result
#[derive(Debug, Error)]
pub enum WaitError {
    /// The deadline passed before the check settled
    #[error("Timeout waiting for {resource} after {timeout:?} ({attempts} attempts)")]
    Timeout {
        resource: String,
        timeout: Duration,
        attempts: u32,
    },

    /// The cancellation token fired
    #[error("Wait for {resource} cancelled")]
    Cancelled { resource: String },

    /// The check itself failed
    #[error("Check for {resource} failed")]
    Check {
        resource: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Poll `check` until it yields a value.
///
/// Uses `backon::ExponentialBuilder` for delay calculation and `tokio::select!`
/// for cancellation support. Sleeps are clamped to the remaining time so the
/// deadline is honoured even with large delays.
///
/// # Arguments
/// * `config` - Wait configuration
/// * `cancel` - Optional cancellation token
/// * `check` - Async function that returns `Ok(Some(v))` when settled, `Ok(None)` to retry
/// * `resource_name` - Name for logging and errors
///
/// # Example
/// ```ignore
/// let status = wait_for_resource(
///     &WaitConfig::default(),
///     Some(&cancel_token),
///     || async {
///         let status = api.operation_status(&handle).await?;
///         Ok(status.is_terminal().then_some(status))
///     },
///     "vm1",
/// ).await?;
/// ```
pub async fn wait_for_resource<T, F, Fut>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> Result<T, WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut attempts = 0u32;

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    let cancelled = || WaitError::Cancelled {
        resource: resource_name.to_string(),
    };
    let timed_out = |attempts| WaitError::Timeout {
        resource: resource_name.to_string(),
        timeout: config.timeout,
        attempts,
    };

    loop {
        attempts += 1;

        // Check cancellation before each attempt
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(cancelled());
        }

        if Instant::now() >= deadline {
            return Err(timed_out(attempts));
        }

        // A slow check must not outlive the deadline or a cancellation
        let outcome = tokio::select! {
            outcome = check() => outcome,
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out(attempts)),
            _ = cancelled_or_pending(cancel) => return Err(cancelled()),
        };

        match outcome {
            Ok(Some(value)) => {
                debug!(resource = %resource_name, attempts, "Resource settled");
                return Ok(value);
            }
            Ok(None) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let delay = delays.next().unwrap_or(config.max_delay).min(remaining);
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Resource not settled, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled_or_pending(cancel) => return Err(cancelled()),
                }
            }
            Err(e) => {
                warn!(resource = %resource_name, error = ?e, "Resource check failed");
                return Err(WaitError::Check {
                    resource: resource_name.to_string(),
                    source: e,
                });
            }
        }
    }
}

/// Resolves when `cancel` fires; never resolves without a token
async fn cancelled_or_pending(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(timeout: Duration) -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            timeout,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_value_once_settled() {
        let calls = AtomicU32::new(0);
        let result = wait_for_resource(
            &fast_config(Duration::from_secs(5)),
            None,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n >= 3).then_some(n))
            },
            "op",
        )
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_error() {
        let result: Result<(), _> = wait_for_resource(
            &fast_config(Duration::from_secs(1)),
            None,
            || async { Ok(None) },
            "never-done",
        )
        .await;

        match result {
            Err(WaitError::Timeout {
                resource, timeout, ..
            }) => {
                assert_eq!(resource, "never-done");
                assert_eq!(timeout, Duration::from_secs(1));
            }
            other => panic!("Expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = wait_for_resource(
            &fast_config(Duration::from_secs(5)),
            Some(&token),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            },
            "op",
        )
        .await;

        assert!(matches!(result, Err(WaitError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_sleep() {
        let token = CancellationToken::new();
        let config = WaitConfig {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result: Result<(), _> =
            wait_for_resource(&config, Some(&token), || async { Ok(None) }, "op").await;
        assert!(matches!(result, Err(WaitError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_check_cancelled_mid_flight() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result: Result<u32, _> = wait_for_resource(
            &fast_config(Duration::from_secs(600)),
            Some(&token),
            || async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(Some(7))
            },
            "slow-op",
        )
        .await;

        assert!(matches!(result, Err(WaitError::Cancelled { .. })));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_check_stops_at_deadline() {
        let start = Instant::now();
        let result: Result<u32, _> = wait_for_resource(
            &fast_config(Duration::from_secs(5)),
            None,
            || async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(Some(7))
            },
            "slow-op",
        )
        .await;

        match result {
            Err(WaitError::Timeout {
                timeout, attempts, ..
            }) => {
                assert_eq!(timeout, Duration::from_secs(5));
                assert_eq!(attempts, 1);
            }
            other => panic!("Expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_check_error_propagates() {
        let result: Result<(), _> = wait_for_resource(
            &fast_config(Duration::from_secs(5)),
            None,
            || async { Err(anyhow::anyhow!("boom")) },
            "op",
        )
        .await;

        match result {
            Err(WaitError::Check { source, .. }) => assert_eq!(source.to_string(), "boom"),
            other => panic!("Expected check error, got {other:?}"),
        }
    }
}
