//! Broker consumer loop.
//!
//! [`BrokerConsumer`] owns the subscribe/poll loop and hands every received
//! message to the [`Dispatcher`]:
//!
//! ```text
//!   Idle ──(no handlers)──────────────────────────► Stopped
//!    │
//!    └─ subscribe(topics) ─► Subscribed ─► Polling ─(shutdown)─► Stopped
//!                                            │  ▲
//!                                   message  │  │ dispatch complete
//!                                            ▼  │
//!                                         Dispatcher
//! ```
//!
//! # Delivery
//!
//! Offsets are committed by the broker client after each successful poll
//! (at-least-once). A crash between receipt and dispatch completion
//! redelivers the message, so handlers must tolerate duplicates.
//!
//! # Ordering
//!
//! Messages are dispatched one at a time, in receipt order. A slow or
//! retry-heavy handler delays every message behind it.
//!
//! # Cancellation
//!
//! Cooperative: the shutdown signal is observed between iterations and while
//! waiting in `poll`, never in the middle of a dispatch (retry waits
//! included).

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::metrics::DispatchMetrics;
use courier_core::broker::{Broker, BrokerError};
use courier_core::message::Message;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Consumer loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// How long one `poll` waits for a message before looping
    pub poll_timeout: Duration,
}

impl ConsumerConfig {
    /// Create a configuration with the given poll timeout.
    #[must_use]
    pub const fn new(poll_timeout: Duration) -> Self {
        Self { poll_timeout }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Lifecycle state of a [`BrokerConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Created, not yet started
    Idle,
    /// Subscription accepted by the broker
    Subscribed,
    /// Running the poll loop
    Polling,
    /// Loop exited
    Stopped,
}

/// Why the consumer loop exited without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// No handler was registered, so nothing was subscribed
    NoHandlers,
    /// The shutdown signal was received
    Cancelled,
}

/// Errors that stop the consumer before it starts polling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The broker rejected the subscription
    #[error("Failed to subscribe: {0}")]
    Subscribe(#[source] BrokerError),
}

/// Subscribe/poll loop feeding a [`Dispatcher`].
pub struct BrokerConsumer {
    broker: Arc<dyn Broker>,
    dispatcher: Arc<Dispatcher>,
    config: ConsumerConfig,
    state: watch::Sender<ConsumerState>,
    shutdown: watch::Receiver<bool>,
}

impl BrokerConsumer {
    /// Create a consumer.
    ///
    /// Returns the consumer and a shutdown sender. Send `true` to the shutdown
    /// sender to stop the loop at its next safe point.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        dispatcher: Arc<Dispatcher>,
        config: ConsumerConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, _) = watch::channel(ConsumerState::Idle);

        let consumer = Self {
            broker,
            dispatcher,
            config,
            state,
            shutdown: shutdown_rx,
        };

        (consumer, shutdown_tx)
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run the loop on a new task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<Result<ConsumerExit, ConsumerError>> {
        tokio::spawn(self.run())
    }

    /// Run the loop until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscribe`] if the broker rejects the
    /// subscription. Consume and dispatch errors are logged and never end
    /// the loop.
    pub async fn run(mut self) -> Result<ConsumerExit, ConsumerError> {
        let topics = self.dispatcher.registry().topics().to_vec();

        if topics.is_empty() {
            tracing::info!("No handlers registered, consumer not subscribing");
            self.transition(ConsumerState::Stopped);
            return Ok(ConsumerExit::NoHandlers);
        }

        if let Err(e) = self.broker.subscribe(&topics).await {
            tracing::error!(topics = ?topics, error = %e, "Failed to subscribe to topics");
            self.transition(ConsumerState::Stopped);
            return Err(ConsumerError::Subscribe(e));
        }
        self.transition(ConsumerState::Subscribed);
        tracing::info!(
            topics = ?topics,
            poll_timeout_ms = self.config.poll_timeout.as_millis(),
            "Consumer subscribed"
        );

        self.transition(ConsumerState::Polling);
        let mut shutdown_open = true;

        while !*self.shutdown.borrow() {
            tokio::select! {
                biased;

                // Handle shutdown
                changed = self.shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        tracing::warn!("Shutdown sender dropped, consumer can no longer be stopped by signal");
                        shutdown_open = false;
                    }
                }

                // Wait for the next message
                polled = self.broker.poll(self.config.poll_timeout) => {
                    match polled {
                        Ok(Some(message)) => self.process(message).await,
                        Ok(None) => {}
                        Err(e) => {
                            DispatchMetrics::record_consume_error();
                            tracing::warn!(error = %e, "Error polling broker, continuing");
                        }
                    }
                }
            }
        }

        tracing::info!("Shutdown signal received, consumer stopped");
        self.transition(ConsumerState::Stopped);
        Ok(ConsumerExit::Cancelled)
    }

    async fn process(&self, message: Message) {
        let span = tracing::info_span!(
            "dispatch",
            topic = %message.topic(),
            partition = message.partition(),
            offset = message.offset(),
        );

        async {
            DispatchMetrics::record_received(message.topic());
            let payload = message.payload_str();

            match self.dispatcher.dispatch(message.topic(), &payload).await {
                Ok(DispatchOutcome::Handled { attempts }) => {
                    tracing::debug!(attempts, "Message processed");
                }
                Ok(outcome) => {
                    tracing::debug!(?outcome, "Message settled without a handler success");
                }
                Err(e) => {
                    // Message is lost to this consumer; the loop keeps going
                    tracing::error!(error = %e, "Failed to settle message");
                }
            }
        }
        .instrument(span)
        .await;
    }

    fn transition(&self, next: ConsumerState) {
        self.state.send_replace(next);
    }
}

impl std::fmt::Debug for BrokerConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConsumer")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
