//! Dead-letter sink.
//!
//! Publishes a [`FailureRecord`] to the fixed `dead-letter` topic when a
//! message has exhausted its processing attempts. The sink does not retry:
//! a failed publish is reported to the caller, which decides what to do.

use crate::metrics::DeadLetterMetrics;
use courier_core::broker::{Broker, BrokerError};
use courier_core::environment::Clock;
use courier_core::failure::FailureRecord;
use courier_core::topics;
use std::sync::Arc;

/// Publishes failure records to the `dead-letter` topic.
#[derive(Clone)]
pub struct DeadLetterSink {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterSink {
    /// Create a sink producing through `broker`, stamping records with `clock`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, clock: Arc<dyn Clock>) -> Self {
        Self { broker, clock }
    }

    /// Topic records are published to.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        topics::DEAD_LETTER
    }

    /// Publish one failure record for `original_message`.
    ///
    /// Returns after the broker acknowledged the write.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::EncodingFailed`] if the record cannot be
    /// encoded, or the broker's error if the produce fails.
    pub async fn send(&self, original_message: &str, error: &str) -> Result<(), BrokerError> {
        let record = FailureRecord::new(original_message, error, self.clock.now());
        let payload = record
            .to_json()
            .map_err(|e| BrokerError::EncodingFailed(e.to_string()))?;

        match self.broker.produce(topics::DEAD_LETTER, payload).await {
            Ok(()) => {
                DeadLetterMetrics::record_sent(topics::DEAD_LETTER);
                tracing::warn!(
                    topic = topics::DEAD_LETTER,
                    error,
                    failed_at = %record.failed_at,
                    "Message dead-lettered"
                );
                Ok(())
            }
            Err(e) => {
                DeadLetterMetrics::record_error();
                tracing::error!(error = %e, "Failed to publish dead-letter record");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for DeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterSink")
            .field("topic", &topics::DEAD_LETTER)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_testing::{InMemoryBroker, test_clock};

    #[tokio::test]
    async fn send_publishes_record_to_dead_letter_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = DeadLetterSink::new(broker.clone(), Arc::new(test_clock()));

        let result = sink.send(r#"{"Id":"1"}"#, "duplicate email").await;
        assert!(result.is_ok());

        let produced = broker.produced_to(topics::DEAD_LETTER);
        assert_eq!(produced.len(), 1);

        let record = FailureRecord::from_json(&produced[0]).ok();
        assert_eq!(
            record,
            Some(FailureRecord::new(
                r#"{"Id":"1"}"#,
                "duplicate email",
                test_clock().now()
            ))
        );
    }

    #[tokio::test]
    async fn send_reports_broker_failure() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_next_produces(1, BrokerError::ConnectionFailed("down".into()));
        let sink = DeadLetterSink::new(broker.clone(), Arc::new(test_clock()));

        let result = sink.send("{}", "boom").await;

        assert_eq!(result, Err(BrokerError::ConnectionFailed("down".into())));
        assert!(broker.produced_to(topics::DEAD_LETTER).is_empty());
    }
}
