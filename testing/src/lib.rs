//! # Courier Testing
//!
//! Testing utilities and helpers for the Courier dispatch pipeline.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a queue-backed broker with failure injection
//! - Handler doubles ([`ScriptedHandler`], [`RecordingHandler`])
//! - A deterministic [`Clock`](courier_core::environment::Clock)
//! - proptest strategies for pipeline inputs
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{InMemoryBroker, ScriptedHandler, test_clock};
//!
//! #[tokio::test]
//! async fn dead_letters_after_exhaustion() {
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let handler = ScriptedHandler::always_failing("user.created", HandlerError::Failed("boom".into()));
//!
//!     let dispatcher = Dispatcher::new(registry_with(handler), RetryPolicy::default(), sink(&broker));
//!     dispatcher.dispatch("user.created", "{}").await?;
//!
//!     assert_eq!(broker.produced_to("dead-letter").len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use courier_core::environment::Clock;

pub mod broker;
pub mod handlers;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_testing::mocks::FixedClock;
    /// use courier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Dotted lowercase topic names such as `user.created`.
    pub fn topic_name() -> impl Strategy<Value = String> {
        "[a-z]{1,8}(\\.[a-z]{1,8}){0,2}"
    }

    /// Arbitrary printable payloads, including the empty string.
    pub fn payload() -> impl Strategy<Value = String> {
        "[ -~]{0,64}"
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use broker::InMemoryBroker;
pub use handlers::{RecordingHandler, ScriptedHandler};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    proptest! {
        #[test]
        fn topic_names_are_non_empty_and_dotted(topic in properties::topic_name()) {
            prop_assert!(!topic.is_empty());
            prop_assert!(!topic.starts_with('.') && !topic.ends_with('.'));
        }
    }
}
