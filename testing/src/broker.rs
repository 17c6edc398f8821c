//! In-memory broker for fast, deterministic pipeline tests.
//!
//! [`InMemoryBroker`] implements [`Broker`] over plain queues:
//! - inbound messages (and consume errors) are queued with
//!   [`push_message`](InMemoryBroker::push_message) /
//!   [`push_error`](InMemoryBroker::push_error) and handed out by `poll`
//! - produced payloads are recorded for assertions
//! - produce failures can be injected for the next N calls or for all calls
//! - call counters let tests prove a call never reached the broker

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use crate::mocks::test_clock;
use courier_core::broker::{Broker, BrokerError, BrokerFuture};
use courier_core::environment::Clock;
use courier_core::message::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// In-memory [`Broker`] for tests.
///
/// # Example
///
/// ```
/// use courier_core::broker::Broker;
/// use courier_testing::InMemoryBroker;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), courier_core::broker::BrokerError> {
/// let broker = InMemoryBroker::new();
/// broker.push_message("user.created", r#"{"Id":"1"}"#);
///
/// let message = broker.poll(Duration::from_millis(10)).await?;
/// assert_eq!(message.map(|m| m.topic().to_string()), Some("user.created".into()));
///
/// broker.produce("order.created", b"{}".to_vec()).await?;
/// assert_eq!(broker.produced_to("order.created").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    inbound: Mutex<VecDeque<Result<Message, BrokerError>>>,
    arrived: Notify,
    next_offset: AtomicI64,
    produced: Mutex<Vec<(String, Vec<u8>)>>,
    subscriptions: Mutex<Vec<Vec<String>>>,
    produce_failures: Mutex<VecDeque<BrokerError>>,
    persistent_produce_failure: Mutex<Option<BrokerError>>,
    subscribe_failure: Mutex<Option<BrokerError>>,
    subscribe_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    produce_calls: AtomicUsize,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound message on `topic` (partition 0, sequential offsets).
    pub fn push_message(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let message = Message::new(topic, payload.into(), test_clock().now()).with_position(0, offset);
        self.push(message);
    }

    /// Queue a fully built inbound message.
    pub fn push(&self, message: Message) {
        self.inbound.lock().unwrap().push_back(Ok(message));
        self.arrived.notify_one();
    }

    /// Queue a consume error; the next `poll` that reaches it returns `Err`.
    pub fn push_error(&self, error: BrokerError) {
        self.inbound.lock().unwrap().push_back(Err(error));
        self.arrived.notify_one();
    }

    /// Number of queued inbound items not yet polled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }

    /// Fail the next `count` produce calls with `error`.
    pub fn fail_next_produces(&self, count: usize, error: BrokerError) {
        let mut failures = self.produce_failures.lock().unwrap();
        failures.extend(std::iter::repeat_n(error, count));
    }

    /// Fail every produce call with `error` until [`heal`](Self::heal).
    pub fn fail_all_produces(&self, error: BrokerError) {
        *self.persistent_produce_failure.lock().unwrap() = Some(error);
    }

    /// Fail the next `subscribe` call with `error`.
    pub fn fail_subscribe(&self, error: BrokerError) {
        *self.subscribe_failure.lock().unwrap() = Some(error);
    }

    /// Clear every injected produce failure.
    pub fn heal(&self) {
        self.produce_failures.lock().unwrap().clear();
        *self.persistent_produce_failure.lock().unwrap() = None;
    }

    /// Every successfully produced `(topic, payload)` pair, in order.
    #[must_use]
    pub fn produced(&self) -> Vec<(String, Vec<u8>)> {
        self.produced.lock().unwrap().clone()
    }

    /// Payloads successfully produced to `topic`, in order.
    #[must_use]
    pub fn produced_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.produced
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Topic sets passed to `subscribe`, one entry per call.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Number of `subscribe` calls, including failed ones.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of `poll` calls.
    #[must_use]
    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    /// Number of `produce` calls, including failed ones.
    #[must_use]
    pub fn produce_calls(&self) -> usize {
        self.produce_calls.load(Ordering::SeqCst)
    }

    fn next_produce_failure(&self) -> Option<BrokerError> {
        let queued = self.produce_failures.lock().unwrap().pop_front();
        queued.or_else(|| self.persistent_produce_failure.lock().unwrap().clone())
    }
}

impl Broker for InMemoryBroker {
    fn subscribe(&self, topics: &[String]) -> BrokerFuture<'_, ()> {
        let topics = topics.to_vec();
        Box::pin(async move {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            let failure = self.subscribe_failure.lock().unwrap().take();
            if let Some(error) = failure {
                return Err(error);
            }
            self.subscriptions.lock().unwrap().push(topics);
            Ok(())
        })
    }

    fn poll(&self, timeout: Duration) -> BrokerFuture<'_, Option<Message>> {
        Box::pin(async move {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let deadline = tokio::time::Instant::now() + timeout;

            loop {
                let next = self.inbound.lock().unwrap().pop_front();
                if let Some(item) = next {
                    return item.map(Some);
                }
                if tokio::time::timeout_at(deadline, self.arrived.notified())
                    .await
                    .is_err()
                {
                    return Ok(None);
                }
            }
        })
    }

    fn produce(&self, topic: &str, payload: Vec<u8>) -> BrokerFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.produce_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.next_produce_failure() {
                return Err(error);
            }
            self.produced.lock().unwrap().push((topic, payload));
            Ok(())
        })
    }
}
