//! # Courier Core
//!
//! Core traits and types for the Courier message dispatch pipeline.
//!
//! This crate defines the seams between the resilience runtime and the
//! outside world:
//!
//! - [`Message`](message::Message): an inbound broker record
//! - [`Handler`](handler::Handler): application code bound to one topic
//! - [`Broker`](broker::Broker): the minimal publish/subscribe capability set
//! - [`FailureRecord`](failure::FailureRecord): the dead-letter payload
//! - [`Clock`](environment::Clock): injected time source
//!
//! ## Flow
//!
//! ```text
//! ┌────────────┐  poll   ┌────────────┐ dispatch ┌────────────┐
//! │   Broker   │────────►│  Consumer  │─────────►│ Dispatcher │
//! └────────────┘         └────────────┘          └─────┬──────┘
//!       ▲                                              │ retry
//!       │ produce("dead-letter")                       ▼
//!       │                                        ┌────────────┐
//!       └────────────────────────────────────────│  Handler   │
//!                      (on exhaustion)           └────────────┘
//! ```
//!
//! Implementations of [`Broker`](broker::Broker) live in `courier-redpanda`
//! (rdkafka) and `courier-testing` (in-memory).

pub use chrono::{DateTime, Utc};

pub mod broker;
pub mod failure;
pub mod handler;
pub mod message;

/// Well-known topic names.
pub mod topics {
    /// Fixed channel collecting messages that permanently failed processing.
    pub const DEAD_LETTER: &str = "dead-letter";

    /// Default topic for user creation events.
    pub const USER_CREATED: &str = "user.created";

    /// Default topic for order creation events.
    pub const ORDER_CREATED: &str = "order.created";
}

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time source used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
