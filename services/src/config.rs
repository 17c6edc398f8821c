//! Configuration management for the Courier host.
//!
//! Loads configuration from environment variables with sensible defaults.

use courier_core::topics;
use courier_redpanda::KafkaBrokerBuilder;
use courier_runtime::{ConsumerConfig, PublisherConfig, RetryPolicy, UnroutablePolicy};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `SERVICE_ROLE` names neither service
    #[error("Unknown service role '{0}' (expected 'orders' or 'users')")]
    UnknownRole(String),

    /// A variable is set but cannot be parsed
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Raw value found in the environment
        value: String,
    },
}

/// Which service this process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Order service: consumes `user.created`, produces `order.created`
    #[default]
    Orders,
    /// User service: consumes `order.created`, produces `user.created`
    Users,
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orders" | "order" => Ok(Self::Orders),
            "users" | "user" => Ok(Self::Users),
            _ => Err(ConfigError::UnknownRole(s.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orders => f.write_str("orders"),
            Self::Users => f.write_str("users"),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Service role
    pub role: Role,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// Inbound pipeline configuration
    pub consumer: ConsumerSettings,
    /// Outbound publisher configuration
    pub publisher: PublisherSettings,
    /// Prometheus exporter listen address
    pub metrics_addr: SocketAddr,
}

/// Kafka configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub bootstrap_servers: String,
    /// Consumer group ID
    pub consumer_group: String,
    /// Where a new consumer group starts reading
    pub auto_offset_reset: String,
    /// Topic for user creation events
    pub user_created_topic: String,
    /// Topic for order creation events
    pub order_created_topic: String,
}

/// Inbound pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Upper bound on a single poll, in milliseconds
    pub poll_timeout_ms: u64,
    /// Handler attempts per message, including the first
    pub retry_max_attempts: u32,
    /// Base retry delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Dead-letter messages that have no handler instead of dropping them
    pub dead_letter_unroutable: bool,
}

/// Outbound publisher configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    /// Retries after the first publish attempt
    pub retries: u32,
    /// Consecutive failures that open the circuit
    pub circuit_failure_threshold: u32,
    /// How long the circuit stays open, in seconds
    pub circuit_break_seconds: u64,
    /// Wait between broker connection attempts at startup, in milliseconds
    pub connect_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `SERVICE_ROLE` or `METRICS_ADDR` is set
    /// to something unusable. Unparseable numeric values fall back to
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let role = match lookup("SERVICE_ROLE") {
            Some(value) => value.parse()?,
            None => Role::default(),
        };

        let metrics_addr = match lookup("METRICS_ADDR") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "METRICS_ADDR",
                value,
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 9090)),
        };

        Ok(Self {
            role,
            kafka: KafkaConfig {
                bootstrap_servers: lookup("KAFKA_BOOTSTRAP_SERVERS")
                    .unwrap_or_else(|| "kafka:9092".to_string()),
                consumer_group: lookup("KAFKA_CONSUMER_GROUP")
                    .unwrap_or_else(|| "service-consumer".to_string()),
                auto_offset_reset: lookup("KAFKA_AUTO_OFFSET_RESET")
                    .unwrap_or_else(|| "earliest".to_string()),
                user_created_topic: lookup("KAFKA_TOPIC_USER_CREATED")
                    .unwrap_or_else(|| topics::USER_CREATED.to_string()),
                order_created_topic: lookup("KAFKA_TOPIC_ORDER_CREATED")
                    .unwrap_or_else(|| topics::ORDER_CREATED.to_string()),
            },
            consumer: ConsumerSettings {
                poll_timeout_ms: lookup("CONSUMER_POLL_TIMEOUT_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
                retry_max_attempts: lookup("RETRY_MAX_ATTEMPTS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                retry_base_delay_ms: lookup("RETRY_BASE_DELAY_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
                dead_letter_unroutable: lookup("DEAD_LETTER_UNROUTABLE")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(false),
            },
            publisher: PublisherSettings {
                retries: lookup("PUBLISH_RETRIES")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                circuit_failure_threshold: lookup("CIRCUIT_FAILURE_THRESHOLD")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                circuit_break_seconds: lookup("CIRCUIT_BREAK_SECONDS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
                connect_interval_ms: lookup("BROKER_CONNECT_INTERVAL_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            },
            metrics_addr,
        })
    }

    /// Topic this role consumes.
    #[must_use]
    pub fn consumed_topic(&self) -> &str {
        match self.role {
            Role::Orders => &self.kafka.user_created_topic,
            Role::Users => &self.kafka.order_created_topic,
        }
    }

    /// Topic this role produces.
    #[must_use]
    pub fn produced_topic(&self) -> &str {
        match self.role {
            Role::Orders => &self.kafka.order_created_topic,
            Role::Users => &self.kafka.user_created_topic,
        }
    }

    /// Retry policy for handler attempts.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.consumer.retry_max_attempts)
            .base_delay(Duration::from_millis(self.consumer.retry_base_delay_ms))
            .build()
    }

    /// Poll loop configuration.
    #[must_use]
    pub const fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(Duration::from_millis(self.consumer.poll_timeout_ms))
    }

    /// What to do with messages that have no handler.
    #[must_use]
    pub const fn unroutable_policy(&self) -> UnroutablePolicy {
        if self.consumer.dead_letter_unroutable {
            UnroutablePolicy::DeadLetter
        } else {
            UnroutablePolicy::Drop
        }
    }

    /// Publisher retry and circuit breaker configuration.
    #[must_use]
    pub const fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig::builder()
            .retries(self.publisher.retries)
            .failure_threshold(self.publisher.circuit_failure_threshold)
            .break_duration(Duration::from_secs(self.publisher.circuit_break_seconds))
            .connect_interval(Duration::from_millis(self.publisher.connect_interval_ms))
            .build()
    }

    /// Kafka client builder for this configuration.
    #[must_use]
    pub fn kafka_builder(&self) -> KafkaBrokerBuilder {
        courier_redpanda::KafkaBroker::builder()
            .brokers(&self.kafka.bootstrap_servers)
            .consumer_group(&self.kafka.consumer_group)
            .auto_offset_reset(&self.kafka.auto_offset_reset)
    }
}
