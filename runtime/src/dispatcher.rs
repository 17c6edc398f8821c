//! Per-message dispatch with retry and dead-lettering.
//!
//! For each inbound `(topic, payload)` the [`Dispatcher`]:
//!
//! ```text
//!   resolve(topic) ──none──► UnroutablePolicy (drop, or dead-letter)
//!        │
//!        ▼
//!   RetryPolicy::execute(handler.handle(payload))
//!        │                          │
//!      Ok(..)                 RetryExhausted
//!        │                          │
//!        ▼                          ▼
//!     Handled            DeadLetterSink::send(payload, error)
//! ```
//!
//! `dispatch` returns only after the handler succeeded or the message was
//! dead-lettered. Failure policy lives here rather than in each handler so
//! every topic gets the same retry and dead-letter format.

use crate::dead_letter::DeadLetterSink;
use crate::metrics::DispatchMetrics;
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use courier_core::broker::BrokerError;
use courier_core::handler::HandlerError;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// What to do with a message whose topic has no handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnroutablePolicy {
    /// Log and acknowledge without dead-lettering
    #[default]
    Drop,
    /// Forward to the dead-letter topic like an exhausted message
    DeadLetter,
}

/// How a dispatched message was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler succeeded
    Handled {
        /// Attempts used, including the successful one
        attempts: u32,
    },
    /// No handler was registered and the message was dropped
    Unrouted,
    /// The message was published to the dead-letter topic
    DeadLettered {
        /// Handler attempts made (0 for an unroutable message)
        attempts: u32,
        /// Error recorded in the failure record
        error: String,
    },
}

/// Errors that end the processing of a single message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The failure record could not be published
    #[error("Failed to dead-letter message: {0}")]
    DeadLetter(#[from] BrokerError),
}

/// Routes messages to handlers under a retry policy.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    retry: RetryPolicy,
    dead_letter: DeadLetterSink,
    unroutable: UnroutablePolicy,
}

impl Dispatcher {
    /// Create a dispatcher that drops unroutable messages.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, retry: RetryPolicy, dead_letter: DeadLetterSink) -> Self {
        Self {
            registry,
            retry,
            dead_letter,
            unroutable: UnroutablePolicy::default(),
        }
    }

    /// Choose how messages without a handler are settled.
    #[must_use]
    pub const fn with_unroutable_policy(mut self, policy: UnroutablePolicy) -> Self {
        self.unroutable = policy;
        self
    }

    /// The routing table.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Dispatch one message and wait until it is settled.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DeadLetter`] if the message had to be
    /// dead-lettered and the publish failed.
    pub async fn dispatch(&self, topic: &str, payload: &str) -> Result<DispatchOutcome, DispatchError> {
        let Some(handler) = self.registry.resolve(topic) else {
            return self.settle_unroutable(topic, payload).await;
        };

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let handler = handler.as_ref();

        let result = self
            .retry
            .execute_with_predicate(
                || {
                    attempts += 1;
                    handler.handle(payload)
                },
                HandlerError::is_retryable,
            )
            .await;

        match result {
            Ok(()) => {
                DispatchMetrics::record_handled(topic, started.elapsed());
                tracing::debug!(topic = %topic, attempts, "Message handled");
                Ok(DispatchOutcome::Handled { attempts })
            }
            Err(exhausted) => {
                let error = exhausted.last_error.to_string();
                tracing::error!(
                    topic = %topic,
                    attempts = exhausted.attempts,
                    error = %error,
                    "Handler failed, dead-lettering message"
                );
                self.dead_letter.send(payload, &error).await?;
                Ok(DispatchOutcome::DeadLettered {
                    attempts: exhausted.attempts,
                    error,
                })
            }
        }
    }

    async fn settle_unroutable(&self, topic: &str, payload: &str) -> Result<DispatchOutcome, DispatchError> {
        DispatchMetrics::record_unrouted(topic);

        match self.unroutable {
            UnroutablePolicy::Drop => {
                tracing::warn!(topic = %topic, "No handler registered for topic, dropping message");
                Ok(DispatchOutcome::Unrouted)
            }
            UnroutablePolicy::DeadLetter => {
                let error = format!("No handler registered for topic '{topic}'");
                tracing::warn!(topic = %topic, "No handler registered for topic, dead-lettering message");
                self.dead_letter.send(payload, &error).await?;
                Ok(DispatchOutcome::DeadLettered { attempts: 0, error })
            }
        }
    }
}
