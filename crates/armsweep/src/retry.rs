//! Bounded retry policy
//!
//! A small strategy object shared by the ARM REST client (throttling and
//! transient server errors) and the machine lock helper (busy locks). The
//! caller decides per error whether another attempt makes sense.

use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// Doubling delay from `initial`, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again if attempts remain
    Retry,
    /// Give up and return this error
    Stop,
}

/// Maximum attempts plus the delay schedule between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (values below 1 behave as 1)
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(
            armsweep_common::defaults::DEFAULT_MAX_REQUEST_ATTEMPTS,
            Duration::from_millis(500),
            Duration::from_secs(10),
        )
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Policy for taking a machine lock held by another session
    pub fn lock_default() -> Self {
        Self::fixed(
            armsweep_common::defaults::DEFAULT_LOCK_ATTEMPTS,
            Duration::from_millis(armsweep_common::defaults::DEFAULT_LOCK_RETRY_DELAY_MS),
        )
    }

    /// Single attempt, no retries
    pub fn never() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let retries = self.max_attempts.saturating_sub(1) as usize;
        match self.backoff {
            Backoff::Fixed(delay) => Box::new(
                ConstantBuilder::default()
                    .with_delay(delay)
                    .with_max_times(retries)
                    .build(),
            ),
            Backoff::Exponential { initial, max } => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(initial)
                    .with_max_delay(max)
                    .with_factor(2.0)
                    .with_max_times(retries)
                    .build(),
            ),
        }
    }

    /// Run `op` until it succeeds, `classify` says stop, or attempts run out.
    ///
    /// The last error is returned unchanged.
    pub async fn run<T, E, F, Fut, C>(&self, what: &str, mut op: F, classify: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: Debug,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delays = self.delays();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if classify(&err) == RetryDecision::Stop {
                return Err(err);
            }

            let Some(delay) = delays.next().filter(|_| attempt < max_attempts) else {
                warn!(what = %what, attempts = attempt, error = ?err, "Giving up after retries");
                return Err(err);
            };

            warn!(
                what = %what,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis(),
                error = ?err,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
