//! Kafka/Redpanda broker adapter for Courier.
//!
//! This crate provides [`KafkaBroker`], an implementation of the
//! [`Broker`] trait from `courier-core` on top of rdkafka.
//!
//! # Why rdkafka?
//!
//! - **Kafka-compatible**: Uses the standard Kafka protocol, works with Apache
//!   Kafka, Redpanda, AWS MSK, Azure Event Hubs, etc.
//! - **Mature client**: librdkafka handles batching, reconnection and
//!   consumer group rebalancing.
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────┐
//!                 │        KafkaBroker        │
//!                 │                           │
//!  subscribe ────►│  StreamConsumer           │◄──── topics
//!  poll ─────────►│   (auto-commit)           │
//!                 │                           │
//!  produce ──────►│  FutureProducer           │────► topic
//!                 └───────────────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with auto-commit:
//! - An offset is stored when `poll` hands the message out and committed in
//!   the background by librdkafka
//! - If the process crashes before the commit interval elapses, messages are
//!   redelivered
//! - Handlers MUST be idempotent
//! - Ordering is guaranteed within a partition
//!
//! # Error Classification
//!
//! rdkafka errors are mapped to [`BrokerError`] so callers can tell transient
//! failures (timeouts, broker transport, full queues) from permanent ones
//! (unknown topic, oversized message).
//!
//! # Example
//!
//! ```no_run
//! use courier_core::broker::Broker;
//! use courier_redpanda::KafkaBroker;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = KafkaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("service-consumer")
//!     .connect()
//!     .await?;
//!
//! broker.subscribe(&["user.created".to_string()]).await?;
//! if let Some(message) = broker.poll(Duration::from_secs(1)).await? {
//!     println!("Received: {message}");
//! }
//!
//! broker.produce("order.created", b"{}".to_vec()).await?;
//! # Ok(())
//! # }
//! ```

use courier_core::Utc;
use courier_core::broker::{Broker, BrokerError, BrokerFuture};
use courier_core::message::Message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Kafka-compatible broker client.
///
/// Owns one producer and one consumer. The consumer joins
/// `consumer_group` when [`subscribe`](Broker::subscribe) is called.
///
/// # Example
///
/// ```no_run
/// use courier_redpanda::KafkaBroker;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let broker = KafkaBroker::new("localhost:9092")?;
///
/// // Custom configuration
/// let broker = KafkaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")  // Wait for all replicas
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaBroker {
    /// Kafka producer for `produce`
    producer: FutureProducer,
    /// Kafka consumer for `subscribe`/`poll`
    consumer: StreamConsumer,
    /// Broker addresses
    brokers: String,
    /// Producer delivery timeout
    timeout: Duration,
    /// Consumer group ID
    consumer_group: String,
}

impl KafkaBroker {
    /// Create a broker client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the rdkafka clients
    /// cannot be created (invalid configuration). No network round trip is
    /// made; see [`probe`](Self::probe).
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the client.
    #[must_use]
    pub fn builder() -> KafkaBrokerBuilder {
        KafkaBrokerBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group ID.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Fetch cluster metadata to verify at least one broker answers.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if no broker answered within
    /// the configured timeout.
    pub async fn probe(&self) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        let timeout = self.timeout;

        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BrokerError::Other(format!("Metadata probe task failed: {e}")))?;

        match metadata {
            Ok(brokers) => {
                tracing::info!(brokers = %self.brokers, live_brokers = brokers, "Kafka reachable");
                Ok(())
            }
            Err(e) => Err(BrokerError::ConnectionFailed(format!(
                "Failed to fetch metadata from {}: {e}",
                self.brokers
            ))),
        }
    }
}

/// Builder for configuring a [`KafkaBroker`].
///
/// Cloneable so the same configuration can be retried while waiting for the
/// cluster to come up.
///
/// # Example
///
/// ```no_run
/// use courier_redpanda::KafkaBroker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = KafkaBroker::builder()
///     .brokers("kafka:9092")
///     .consumer_group("service-consumer")
///     .auto_offset_reset("earliest")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct KafkaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl KafkaBrokerBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// - `compression`: "none", "gzip", "snappy", "lz4", "zstd"
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer delivery timeout (also used for the metadata probe).
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID.
    ///
    /// Default: "service-consumer"
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new consumer group starts reading.
    ///
    /// - `"earliest"`: Start from the beginning of the topic
    /// - `"latest"`: Start from the end (only new messages)
    ///
    /// Default: "earliest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaBroker`] without contacting the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Producer or consumer cannot be created
    pub fn build(self) -> Result<KafkaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| "service-consumer".to_string());
        let auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("earliest");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &consumer_group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            consumer_group = %consumer_group,
            auto_offset_reset,
            "KafkaBroker created"
        );

        Ok(KafkaBroker {
            producer,
            consumer,
            brokers,
            timeout,
            consumer_group,
        })
    }

    /// Build the client and verify the cluster answers.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the client cannot be
    /// built or no broker answered the metadata probe.
    pub async fn connect(self) -> Result<KafkaBroker, BrokerError> {
        let broker = self.build()?;
        broker.probe().await?;
        Ok(broker)
    }
}

impl Broker for KafkaBroker {
    fn subscribe(&self, topics: &[String]) -> BrokerFuture<'_, ()> {
        let topics = topics.to_vec();

        Box::pin(async move {
            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            self.consumer
                .subscribe(&topic_refs)
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: e.to_string(),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %self.consumer_group,
                "Subscribed to topics"
            );
            Ok(())
        })
    }

    fn poll(&self, timeout: Duration) -> BrokerFuture<'_, Option<Message>> {
        Box::pin(async move {
            let Ok(received) = tokio::time::timeout(timeout, self.consumer.recv()).await else {
                return Ok(None);
            };

            let borrowed = received.map_err(|e| classify_consume_error(&e))?;
            let mut message = Message::new(
                borrowed.topic(),
                borrowed.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                Utc::now(),
            )
            .with_position(borrowed.partition(), borrowed.offset());
            if let Some(key) = borrowed.key() {
                message = message.with_key(key.to_vec());
            }

            tracing::trace!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Received message"
            );
            Ok(Some(message))
        })
    }

    fn produce(&self, topic: &str, payload: Vec<u8>) -> BrokerFuture<'_, ()> {
        let topic = topic.to_string();
        let timeout = self.timeout;

        Box::pin(async move {
            let record: FutureRecord<'_, (), [u8]> =
                FutureRecord::to(&topic).payload(payload.as_slice());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        "Message produced"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to produce message"
                    );
                    Err(classify_produce_error(&topic, &kafka_error))
                }
            }
        })
    }
}

/// Map a produce failure to a [`BrokerError`].
///
/// Unknown topics and oversized messages are permanent; everything else is
/// reported as a (transient) produce failure.
#[must_use]
pub fn classify_produce_error(topic: &str, error: &KafkaError) -> BrokerError {
    match error.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::InvalidTopic,
        ) => {
            BrokerError::InvalidTopic(format!("{topic}: {error}"))
        }
        Some(RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessageSize) => {
            BrokerError::EncodingFailed(format!("{topic}: {error}"))
        }
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            BrokerError::Timeout(format!("{topic}: {error}"))
        }
        _ => BrokerError::ProduceFailed {
            topic: topic.to_string(),
            reason: error.to_string(),
        },
    }
}

/// Map a consume failure to a [`BrokerError`].
///
/// All consume errors are transient: the consumer loop logs them and keeps
/// polling.
#[must_use]
pub fn classify_consume_error(error: &KafkaError) -> BrokerError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::AllBrokersDown) => {
            BrokerError::ConnectionFailed(format!("Failed to receive message: {error}"))
        }
        _ => BrokerError::TransportError(format!("Failed to receive message: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaBroker>();
        assert_sync::<KafkaBroker>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = KafkaBroker::builder().build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn build_does_not_contact_cluster() {
        // Nothing listens on this port; creation is still fine
        let broker = KafkaBroker::builder()
            .brokers("127.0.0.1:1")
            .consumer_group("unit-test")
            .build();

        assert!(broker.is_ok_and(|b| b.consumer_group() == "unit-test" && b.brokers() == "127.0.0.1:1"));
    }

    #[test]
    fn produce_errors_are_classified() {
        let unknown = KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopicOrPartition);
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        let timed_out = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        let queue_full = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);

        assert!(matches!(classify_produce_error("t", &unknown), BrokerError::InvalidTopic(_)));
        assert!(matches!(classify_produce_error("t", &too_large), BrokerError::EncodingFailed(_)));
        assert!(classify_produce_error("t", &timed_out).is_transient());
        assert!(classify_produce_error("t", &queue_full).is_transient());
    }

    #[test]
    fn consume_errors_are_transient() {
        let down = KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown);
        let other = KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure);

        assert!(matches!(classify_consume_error(&down), BrokerError::ConnectionFailed(_)));
        assert!(classify_consume_error(&other).is_transient());
    }

    #[tokio::test]
    async fn probe_fails_when_nothing_listens() {
        let broker = KafkaBroker::builder()
            .brokers("127.0.0.1:1")
            .timeout(Duration::from_millis(200))
            .build();

        if let Ok(broker) = broker {
            assert!(matches!(broker.probe().await, Err(BrokerError::ConnectionFailed(_))));
        }
    }
}
