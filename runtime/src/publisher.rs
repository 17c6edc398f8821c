//! Resilient outbound publishing.
//!
//! [`ResilientPublisher`] wraps [`Broker::produce`] in two composed policies,
//! outer to inner:
//!
//! ```text
//!   publish(topic, msg)
//!        │ serde_json
//!        ▼
//!   ┌───────────────────────────────────────────┐
//!   │ RetryPolicy (transient errors only)       │
//!   │   waits 2s, 4s, 8s ...                    │
//!   │   ┌─────────────────────────────────────┐ │
//!   │   │ CircuitBreaker                      │ │
//!   │   │   Open → reject without a call      │ │
//!   │   │   ┌───────────────────────────────┐ │ │
//!   │   │   │ Broker::produce               │ │ │
//!   │   │   └───────────────────────────────┘ │ │
//!   │   └─────────────────────────────────────┘ │
//!   └───────────────────────────────────────────┘
//! ```
//!
//! Every attempt the retry layer makes counts toward the breaker's
//! consecutive-failure threshold. Once the breaker opens, the rejection is
//! not retried: the caller sees [`PublishError::CircuitOpen`] immediately.
//!
//! Unlike the inbound path there is no implicit dead-lettering; the final
//! error is returned and the calling code decides what to do with it.

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics, State,
};
use crate::metrics::PublisherMetrics;
use crate::retry::RetryPolicy;
use courier_core::broker::{Broker, BrokerError};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by [`ResilientPublisher`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The circuit breaker is open; the broker was not called
    #[error("Circuit breaker is open, publish to '{topic}' rejected")]
    CircuitOpen {
        /// Topic of the rejected publish
        topic: String,
    },

    /// The broker failed and retries (if any) were exhausted
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The message could not be serialized
    #[error("Failed to encode message: {0}")]
    Encoding(String),
}

impl PublishError {
    /// Whether the retry layer should try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Broker(e) => e.is_transient(),
            Self::CircuitOpen { .. } | Self::Encoding(_) => false,
        }
    }
}

/// Publisher configuration.
///
/// # Default Values
///
/// - `retries`: 3 (after the first attempt)
/// - `retry_base_delay`: 1s (waits of 2s, 4s, 8s)
/// - `failure_threshold`: 3
/// - `break_duration`: 30s
/// - `connect_interval`: 2s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    retries: u32,
    retry_base_delay: Duration,
    failure_threshold: u32,
    break_duration: Duration,
    connect_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PublisherConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> PublisherConfigBuilder {
        PublisherConfigBuilder {
            config: Self {
                retries: 3,
                retry_base_delay: Duration::from_secs(1),
                failure_threshold: 3,
                break_duration: Duration::from_secs(30),
                connect_interval: Duration::from_secs(2),
            },
        }
    }

    /// Retries after the first attempt.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Interval between connection attempts at startup.
    #[must_use]
    pub const fn connect_interval(&self) -> Duration {
        self.connect_interval
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.retries.saturating_add(1))
            .base_delay(self.retry_base_delay)
            .multiplier(2.0)
            .build()
    }

    fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .name("publisher")
            .failure_threshold(self.failure_threshold)
            .break_duration(self.break_duration)
            .build()
    }
}

/// Builder for [`PublisherConfig`].
#[derive(Debug, Clone)]
pub struct PublisherConfigBuilder {
    config: PublisherConfig,
}

impl PublisherConfigBuilder {
    /// Set the number of retries after the first attempt.
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Set the retry base delay; the wait after attempt `k` is `base * 2^k`.
    #[must_use]
    pub const fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    /// Set the consecutive failures that open the circuit.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open.
    #[must_use]
    pub const fn break_duration(mut self, duration: Duration) -> Self {
        self.config.break_duration = duration;
        self
    }

    /// Set the interval between startup connection attempts.
    #[must_use]
    pub const fn connect_interval(mut self, interval: Duration) -> Self {
        self.config.connect_interval = interval;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub const fn build(self) -> PublisherConfig {
        self.config
    }
}

/// Publishes through retry and a circuit breaker.
///
/// The breaker state is owned by this instance and shared by every caller
/// holding it (clones share state).
#[derive(Clone)]
pub struct ResilientPublisher {
    broker: Arc<dyn Broker>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilientPublisher {
    /// Wrap an already connected broker client.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, config: &PublisherConfig) -> Self {
        Self {
            broker,
            retry: config.retry_policy(),
            breaker: CircuitBreaker::new(config.breaker_config()),
        }
    }

    /// Build a publisher, waiting for the broker to become reachable.
    ///
    /// `connector` is retried every `connect_interval` until it succeeds;
    /// this never gives up.
    pub async fn connect<F, Fut>(mut connector: F, config: PublisherConfig) -> Self
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Broker>, BrokerError>>,
    {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            match connector().await {
                Ok(broker) => {
                    tracing::info!(attempt, "Broker connection established");
                    return Self::new(broker, &config);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = config.connect_interval.as_millis(),
                        "Broker not reachable yet, retrying"
                    );
                    tokio::time::sleep(config.connect_interval).await;
                }
            }
        }
    }

    /// Serialize `message` as JSON and publish it to `topic`.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Encoding`] if serialization fails
    /// - [`PublishError::CircuitOpen`] if the breaker rejected the call
    /// - [`PublishError::Broker`] with the last error once retries are exhausted
    ///   or a non-transient error occurred
    pub async fn publish<T>(&self, topic: &str, message: &T) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        let payload =
            serde_json::to_vec(message).map_err(|e| PublishError::Encoding(e.to_string()))?;
        self.publish_raw(topic, payload).await
    }

    /// Publish pre-encoded bytes to `topic`.
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish), minus encoding.
    pub async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let started = Instant::now();

        let result = self
            .retry
            .execute_with_predicate(
                move || {
                    let payload = payload.clone();
                    async move {
                        self.breaker
                            .call(|| self.broker.produce(topic, payload))
                            .await
                            .map_err(|e| match e {
                                CircuitBreakerError::Open => PublishError::CircuitOpen {
                                    topic: topic.to_string(),
                                },
                                CircuitBreakerError::Inner(e) => PublishError::Broker(e),
                            })
                    }
                },
                PublishError::is_retryable,
            )
            .await;

        match result {
            Ok(()) => {
                PublisherMetrics::record_publish(topic, started.elapsed());
                tracing::debug!(topic = %topic, "Message published");
                Ok(())
            }
            Err(exhausted) => {
                PublisherMetrics::record_error(topic);
                tracing::error!(
                    topic = %topic,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Failed to publish message"
                );
                Err(exhausted.into_inner())
            }
        }
    }

    /// The broker client this publisher writes to.
    #[must_use]
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    /// Current circuit breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> State {
        self.breaker.state()
    }

    /// Circuit breaker call counters.
    #[must_use]
    pub fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }
}

impl std::fmt::Debug for ResilientPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientPublisher")
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
