//! Bounded retry with exponential backoff.
//!
//! [`RetryPolicy::execute`] runs an async action up to `max_attempts` times.
//! After failed attempt `k` (1-based) it waits `base_delay × multiplier^k`
//! before the next attempt, so with the defaults (3 attempts, 500ms, ×2) the
//! waits are 1000ms then 2000ms. There is no jitter and, unless
//! [`RetryPolicyBuilder::max_delay`] is set, no cap.
//!
//! Exhaustion is reported exactly once as [`RetryExhausted`]; the action's
//! error never escapes any other way, so the caller's `Err` branch is the
//! single failure notification.
//!
//! Waits are `tokio::time::sleep` suspension points: they block the current
//! call only, never the executor thread.
//!
//! # Example
//!
//! ```rust
//! use courier_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(500))
//!     .build();
//!
//! match policy.execute(|| async { Ok::<_, String>(42) }).await {
//!     Ok(value) => assert_eq!(value, 42),
//!     Err(exhausted) => eprintln!("gave up: {exhausted}"),
//! }
//! # }
//! ```

use crate::metrics::RetryMetrics;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Retry policy configuration.
///
/// # Default Values
///
/// - `max_attempts`: 3 (total attempts, including the first)
/// - `base_delay`: 500ms
/// - `multiplier`: 2.0
/// - `max_delay`: none
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Returned when every attempt failed (or a non-retryable error ended the loop).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted<E: fmt::Display> {
    /// Number of times the action ran
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: E,
}

impl<E: fmt::Display> RetryExhausted<E> {
    /// Consume and return the final error.
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: None,
        }
    }

    /// Total number of attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay the backoff grows from.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    ///
    /// `base_delay * multiplier^attempt`, capped at `max_delay` when one is set.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)] // attempt counts are tiny
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(cap) if delay > cap => cap,
            _ => delay,
        }
    }

    /// Run `action` until it succeeds or the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] carrying the last error after
    /// `max_attempts` failures.
    pub async fn execute<F, Fut, T, E>(&self, action: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_predicate(action, |_| true).await
    }

    /// Like [`execute`](Self::execute), but stops at the first error for
    /// which `is_retryable` returns `false`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] after `max_attempts` failures, or right
    /// after a non-retryable failure.
    pub async fn execute_with_predicate<F, Fut, T, E, P>(
        &self,
        mut action: F,
        is_retryable: P,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match action().await {
                Ok(value) => {
                    if attempt > 1 {
                        RetryMetrics::record_success();
                        tracing::info!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !is_retryable(&err) {
                        tracing::warn!(
                            attempt,
                            error = %err,
                            "Error is not retryable, failing immediately"
                        );
                        RetryMetrics::record_exhausted();
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    if attempt >= self.max_attempts {
                        tracing::error!(
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %err,
                            "Operation failed after max attempts"
                        );
                        RetryMetrics::record_exhausted();
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Operation failed, retrying..."
                    );
                    RetryMetrics::record_attempt();
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set the total number of attempts. Values below 1 are clamped to 1.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay.
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Cap individual delays.
    ///
    /// Unset by default: delays grow geometrically without bound.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: self.base_delay,
            multiplier: self.multiplier,
            max_delay: self.max_delay,
        }
    }
}
