//! Broker abstraction for topic-based publish/subscribe.
//!
//! This module provides the [`Broker`] trait: the minimal capability set the
//! dispatch pipeline needs from a message broker. Any client that can
//! subscribe to topics, poll for the next message with a timeout, and produce
//! a payload to a topic is substitutable.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: offsets are committed after a successful poll, so a
//!   crash between receipt and dispatch completion redelivers the message
//! - **Idempotency**: handlers must tolerate duplicate processing
//! - **Ordered within partition**: receipt order is preserved per partition
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `courier-testing` - for tests (fast, deterministic)
//! - `KafkaBroker` in `courier-redpanda` - for production (Kafka-compatible)
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::broker::Broker;
//! use std::time::Duration;
//!
//! async fn example(broker: impl Broker) -> Result<(), BrokerError> {
//!     broker.subscribe(&["user.created".to_string()]).await?;
//!
//!     while let Some(message) = broker.poll(Duration::from_secs(1)).await? {
//!         println!("Received: {message}");
//!     }
//!
//!     broker.produce("order.created", b"{}".to_vec()).await
//! }
//! ```

use crate::message::Message;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to produce a payload to a topic
    #[error("Produce failed for topic '{topic}': {reason}")]
    ProduceFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// The broker did not answer in time
    #[error("Broker operation timed out: {0}")]
    Timeout(String),

    /// Network or transport error while consuming
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Payload could not be encoded for the wire
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Generic error for other failures
    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Connection, timeout, transport and produce failures are transient.
    /// Invalid topics, encoding failures and subscription failures are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_core::broker::BrokerError;
    ///
    /// assert!(BrokerError::Timeout("5s".into()).is_transient());
    /// assert!(!BrokerError::InvalidTopic("".into()).is_transient());
    /// ```
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ProduceFailed { .. }
                | Self::Timeout(_)
                | Self::TransportError(_)
        )
    }
}

/// Boxed future returned by [`Broker`] operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Trait for message broker clients.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the consumer loop and any number of
/// publishers share one client through `Arc<dyn Broker>`.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` to enable trait object usage (`Arc<dyn Broker>`).
pub trait Broker: Send + Sync {
    /// Subscribe the consumer side of this client to `topics`.
    ///
    /// Called once per consumer lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription is
    /// rejected.
    fn subscribe(&self, topics: &[String]) -> BrokerFuture<'_, ()>;

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a message. The
    /// returned future may be dropped at any point to cancel the wait.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransportError`] (or another transient variant)
    /// for consume-level failures. Callers are expected to log these and keep
    /// polling.
    fn poll(&self, timeout: Duration) -> BrokerFuture<'_, Option<Message>>;

    /// Produce `payload` to `topic` and wait for the broker acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ProduceFailed`] if delivery fails.
    fn produce(&self, topic: &str, payload: Vec<u8>) -> BrokerFuture<'_, ()>;
}
