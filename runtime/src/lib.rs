//! # Courier Runtime
//!
//! Inbound dispatch and outbound publishing with failure policy built in.
//!
//! ## Core Components
//!
//! - **`BrokerConsumer`**: owns the subscribe/poll loop
//! - **`Dispatcher`**: routes each message to its handler under a `RetryPolicy`
//!   and dead-letters it once attempts are exhausted
//! - **`DeadLetterSink`**: publishes failure records to `dead-letter`
//! - **`ResilientPublisher`**: retry around a circuit breaker around `produce`
//!
//! ```text
//!                 ┌──────────────────┐
//!   Broker ──────►│  BrokerConsumer  │  one task, sequential
//!                 └────────┬─────────┘
//!                          ▼
//!                 ┌──────────────────┐      ┌─────────────────┐
//!                 │    Dispatcher    │─────►│ HandlerRegistry │
//!                 └────────┬─────────┘      └─────────────────┘
//!                 exhausted│
//!                          ▼
//!                 ┌──────────────────┐
//!                 │  DeadLetterSink  │──────► "dead-letter"
//!                 └──────────────────┘
//!
//!   app code ───► ResilientPublisher ──► retry ──► breaker ──► Broker
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use courier_runtime::{
//!     BrokerConsumer, ConsumerConfig, DeadLetterSink, Dispatcher, HandlerRegistry, RetryPolicy,
//! };
//!
//! let registry = HandlerRegistry::builder()
//!     .register(UserCreatedHandler::new(users))
//!     .build();
//!
//! let sink = DeadLetterSink::new(broker.clone(), Arc::new(SystemClock));
//! let dispatcher = Dispatcher::new(Arc::new(registry), RetryPolicy::default(), sink);
//!
//! let (consumer, shutdown) = BrokerConsumer::new(broker, Arc::new(dispatcher), ConsumerConfig::default());
//! let task = consumer.spawn();
//!
//! tokio::signal::ctrl_c().await?;
//! shutdown.send(true).ok();
//! task.await??;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Prometheus metrics for observability
pub mod metrics;

/// Dead-letter publishing
pub mod dead_letter;

/// Topic to handler routing
pub mod registry;

/// Per-message dispatch
pub mod dispatcher;

/// Subscribe/poll loop
pub mod consumer;

/// Outbound publishing with retry and circuit breaking
pub mod publisher;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use consumer::{BrokerConsumer, ConsumerConfig, ConsumerError, ConsumerExit, ConsumerState};
pub use dead_letter::DeadLetterSink;
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, UnroutablePolicy};
pub use publisher::{PublishError, PublisherConfig, ResilientPublisher};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use retry::{RetryExhausted, RetryPolicy};
