//! End-to-end tests for the dispatch pipeline and the resilient publisher
//!
//! Everything runs over `InMemoryBroker`; timing assertions use a paused
//! tokio clock so retry and circuit-breaker waits cost nothing.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use courier_core::broker::{Broker, BrokerError, BrokerFuture};
use courier_core::failure::FailureRecord;
use courier_core::handler::{HandleFuture, Handler, HandlerError};
use courier_core::message::Message;
use courier_core::topics;
use courier_runtime::circuit_breaker::State;
use courier_runtime::{
    BrokerConsumer, ConsumerConfig, ConsumerExit, ConsumerState, DeadLetterSink, Dispatcher,
    HandlerRegistry, PublishError, PublisherConfig, ResilientPublisher, RetryPolicy,
};
use courier_testing::{InMemoryBroker, RecordingHandler, ScriptedHandler, init_test_tracing, test_clock};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

// ============================================================================
// Test Fixtures
// ============================================================================

/// Fails every attempt and remembers when each attempt started.
struct TimedFailingHandler {
    topic: String,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

impl Handler for TimedFailingHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn handle<'a>(&'a self, _payload: &'a str) -> HandleFuture<'a> {
        self.attempts.lock().unwrap().push(Instant::now());
        Box::pin(async { Err(HandlerError::Failed("database unavailable".into())) })
    }
}

/// Lets one produce through per permit added to `gate`.
struct GatedBroker {
    inner: InMemoryBroker,
    gate: Semaphore,
}

impl Broker for GatedBroker {
    fn subscribe(&self, topics: &[String]) -> BrokerFuture<'_, ()> {
        self.inner.subscribe(topics)
    }

    fn poll(&self, timeout: Duration) -> BrokerFuture<'_, Option<Message>> {
        self.inner.poll(timeout)
    }

    fn produce(&self, topic: &str, payload: Vec<u8>) -> BrokerFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            // Each produce consumes one permit for good
            self.gate
                .acquire()
                .await
                .map_err(|e| BrokerError::Other(e.to_string()))?
                .forget();
            self.inner.produce(&topic, payload).await
        })
    }
}

fn dispatcher(broker: &Arc<InMemoryBroker>, registry: HandlerRegistry) -> Arc<Dispatcher> {
    let sink = DeadLetterSink::new(broker.clone(), Arc::new(test_clock()));
    let retry = RetryPolicy::builder()
        .max_attempts(3)
        .base_delay(Duration::from_millis(500))
        .build();
    Arc::new(Dispatcher::new(Arc::new(registry), retry, sink))
}

async fn wait_for_dead_letters(broker: &InMemoryBroker, count: usize) -> Vec<FailureRecord> {
    loop {
        let produced = broker.produced_to(topics::DEAD_LETTER);
        if produced.len() >= count {
            return produced
                .iter()
                .map(|bytes| FailureRecord::from_json(bytes).unwrap())
                .collect();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Dispatch pipeline
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failing_user_created_handler_is_dead_lettered_after_backoff() {
    init_test_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let handler = TimedFailingHandler {
        topic: topics::USER_CREATED.to_string(),
        attempts: Arc::clone(&attempts),
    };
    let dispatcher = dispatcher(&broker, HandlerRegistry::builder().register(handler).build());
    let (consumer, shutdown) =
        BrokerConsumer::new(broker.clone(), dispatcher, ConsumerConfig::default());

    let payload = r#"{"Id":"6f1c","Name":"Ada","Email":"ada@example.com"}"#;
    broker.push_message(topics::USER_CREATED, payload);
    let task = consumer.spawn();

    let records = wait_for_dead_letters(&broker, 1).await;
    shutdown.send(true).unwrap();
    assert_eq!(task.await.unwrap(), Ok(ConsumerExit::Cancelled));

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].original_message, payload);
    assert!(records[0].error.contains("database unavailable"));
    assert_eq!(records[0].failed_at, courier_core::environment::Clock::now(&test_clock()));

    let attempts = attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 3);
    let first_wait = attempts[1] - attempts[0];
    let second_wait = attempts[2] - attempts[1];
    assert!(first_wait >= Duration::from_millis(1000) && first_wait < Duration::from_millis(1050));
    assert!(second_wait >= Duration::from_millis(2000) && second_wait < Duration::from_millis(2050));
}

#[tokio::test]
async fn test_consumer_without_handlers_never_subscribes() {
    let broker = Arc::new(InMemoryBroker::new());
    let dispatcher = dispatcher(&broker, HandlerRegistry::builder().build());
    let (consumer, _shutdown) =
        BrokerConsumer::new(broker.clone(), dispatcher, ConsumerConfig::default());
    let state = consumer.state();

    let exit = consumer.run().await;

    assert_eq!(exit, Ok(ConsumerExit::NoHandlers));
    assert!(broker.subscriptions().is_empty());
    assert_eq!(*state.borrow(), ConsumerState::Stopped);
}

#[tokio::test]
async fn test_unrouted_topic_touches_neither_handler_nor_dead_letter() {
    let broker = Arc::new(InMemoryBroker::new());
    let (handler, mut seen) = RecordingHandler::new(topics::ORDER_CREATED);
    let dispatcher = dispatcher(&broker, HandlerRegistry::builder().register(handler).build());
    let (consumer, shutdown) = BrokerConsumer::new(
        broker.clone(),
        dispatcher,
        ConsumerConfig::new(Duration::from_millis(20)),
    );

    broker.push_message("inventory.adjusted", "{}");
    broker.push_message(topics::ORDER_CREATED, "order-1");
    let task = consumer.spawn();

    // Receipt order: once order-1 is seen the unrouted message was settled
    assert_eq!(seen.recv().await.as_deref(), Some("order-1"));
    shutdown.send(true).unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(broker.produce_calls(), 0);
    assert!(seen.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retrying_message_blocks_later_messages_until_settled() {
    let broker = Arc::new(InMemoryBroker::new());
    let flaky = ScriptedHandler::failing_times(
        topics::USER_CREATED,
        2,
        HandlerError::Failed("transient".into()),
    );
    let (orders, mut seen) = RecordingHandler::new(topics::ORDER_CREATED);
    let registry = HandlerRegistry::builder()
        .register(flaky.clone())
        .register(orders)
        .build();
    let dispatcher = dispatcher(&broker, registry);
    let (consumer, shutdown) =
        BrokerConsumer::new(broker.clone(), dispatcher, ConsumerConfig::default());

    broker.push_message(topics::USER_CREATED, "user-1");
    broker.push_message(topics::ORDER_CREATED, "order-1");
    let started = Instant::now();
    let task = consumer.spawn();

    assert_eq!(seen.recv().await.as_deref(), Some("order-1"));
    // The order waited out both retry delays of the user message
    assert!(started.elapsed() >= Duration::from_millis(3000));
    assert_eq!(flaky.calls(), 3);
    assert!(broker.produced_to(topics::DEAD_LETTER).is_empty());

    shutdown.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dead_letter_failure_does_not_stop_the_loop() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next_produces(1, BrokerError::ConnectionFailed("broker restarting".into()));
    let failing = ScriptedHandler::always_failing(topics::USER_CREATED, HandlerError::Rejected("duplicate".into()));
    let dispatcher = dispatcher(&broker, HandlerRegistry::builder().register(failing).build());
    let (consumer, shutdown) =
        BrokerConsumer::new(broker.clone(), dispatcher, ConsumerConfig::default());

    broker.push_message(topics::USER_CREATED, "lost");
    broker.push_message(topics::USER_CREATED, "kept");
    let task = consumer.spawn();

    let records = wait_for_dead_letters(&broker, 1).await;
    shutdown.send(true).unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].original_message, "kept");
}

// ============================================================================
// Resilient publisher
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_breaker_admits_exactly_one_probe_after_break() {
    let broker = Arc::new(GatedBroker {
        inner: InMemoryBroker::new(),
        gate: Semaphore::new(3),
    });
    broker.inner.fail_all_produces(BrokerError::Timeout("no ack".into()));
    let config = PublisherConfig::builder()
        .retries(0)
        .failure_threshold(3)
        .break_duration(Duration::from_secs(30))
        .build();
    let publisher = ResilientPublisher::new(broker.clone(), &config);

    for _ in 0..3 {
        assert!(matches!(
            publisher.publish_raw("order.created", b"{}".to_vec()).await,
            Err(PublishError::Broker(BrokerError::Timeout(_)))
        ));
    }
    assert_eq!(publisher.circuit_state(), State::Open);

    // While open: rejected without reaching the broker
    let rejected = publisher.publish_raw("order.created", b"{}".to_vec()).await;
    assert_eq!(rejected, Err(PublishError::CircuitOpen { topic: "order.created".into() }));
    assert_eq!(broker.inner.produce_calls(), 3);

    broker.inner.heal();
    tokio::time::sleep(Duration::from_secs(31)).await;

    let probe = {
        let publisher = publisher.clone();
        tokio::spawn(async move { publisher.publish_raw("order.created", b"probe".to_vec()).await })
    };
    tokio::task::yield_now().await;

    // The probe is parked at the gate; a concurrent caller is still rejected
    let concurrent = publisher.publish_raw("order.created", b"{}".to_vec()).await;
    assert_eq!(concurrent, Err(PublishError::CircuitOpen { topic: "order.created".into() }));

    broker.gate.add_permits(1);
    assert_eq!(probe.await.unwrap(), Ok(()));
    assert_eq!(publisher.circuit_state(), State::Closed);
    assert_eq!(broker.inner.produced_to("order.created"), vec![b"probe".to_vec()]);
}
