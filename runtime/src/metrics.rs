//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for all pipeline components:
//! - Message dispatch (received, handled, unrouted, handler latency)
//! - Dead-lettering
//! - Resilient publishing
//! - Circuit breaker state
//! - Retry attempts
//!
//! Recorders are zero-sized types whose functions emit through the `metrics`
//! facade. Without an installed recorder they are no-ops, so library code can
//! call them unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::circuit_breaker::State;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or the listener cannot bind.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), the listener is
    /// not spawned and this returns `Ok` with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Dispatch Metrics
    describe_counter!(
        "dispatch_messages_received_total",
        "Total number of messages received by the consumer"
    );
    describe_counter!(
        "dispatch_messages_handled_total",
        "Total number of messages a handler processed successfully"
    );
    describe_counter!(
        "dispatch_messages_unrouted_total",
        "Total number of messages with no registered handler"
    );
    describe_counter!(
        "dispatch_consume_errors_total",
        "Total number of poll errors seen by the consumer loop"
    );
    describe_histogram!(
        "dispatch_handler_duration_seconds",
        "Time taken to dispatch one message, retries included"
    );

    // Dead Letter Metrics
    describe_counter!(
        "dead_letter_records_total",
        "Total number of failure records published to the dead-letter topic"
    );
    describe_counter!(
        "dead_letter_errors_total",
        "Total number of failure records that could not be published"
    );

    // Publisher Metrics
    describe_counter!(
        "publisher_messages_published_total",
        "Total number of messages acknowledged by the broker"
    );
    describe_counter!(
        "publisher_errors_total",
        "Total number of publish calls that failed"
    );
    describe_histogram!(
        "publisher_publish_duration_seconds",
        "Time taken to publish messages, retries included"
    );

    // Circuit Breaker Metrics
    describe_gauge!(
        "circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "circuit_breaker_calls_total",
        "Total number of calls through circuit breaker"
    );
    describe_counter!(
        "circuit_breaker_successes_total",
        "Total number of successful calls"
    );
    describe_counter!(
        "circuit_breaker_failures_total",
        "Total number of failed calls"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Total number of rejected calls (circuit open)"
    );

    // Retry Metrics
    describe_counter!(
        "retry_attempts_total",
        "Total number of retry attempts"
    );
    describe_counter!(
        "retry_successes_total",
        "Total number of successful retries"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a message received from the broker.
    pub fn record_received(topic: &str) {
        counter!("dispatch_messages_received_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a message a handler processed successfully.
    pub fn record_handled(topic: &str, duration: Duration) {
        counter!("dispatch_messages_handled_total", "topic" => topic.to_string()).increment(1);
        histogram!("dispatch_handler_duration_seconds", "topic" => topic.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a message with no registered handler.
    pub fn record_unrouted(topic: &str) {
        counter!("dispatch_messages_unrouted_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a poll error.
    pub fn record_consume_error() {
        counter!("dispatch_consume_errors_total").increment(1);
    }
}

/// Dead-letter metrics recorder.
pub struct DeadLetterMetrics;

impl DeadLetterMetrics {
    /// Record a failure record published.
    pub fn record_sent(topic: &str) {
        counter!("dead_letter_records_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a failure record that could not be published.
    pub fn record_error() {
        counter!("dead_letter_errors_total").increment(1);
    }
}

/// Publisher metrics recorder.
pub struct PublisherMetrics;

impl PublisherMetrics {
    /// Record a message publish.
    pub fn record_publish(topic: &str, duration: Duration) {
        counter!("publisher_messages_published_total", "topic" => topic.to_string()).increment(1);
        histogram!("publisher_publish_duration_seconds", "topic" => topic.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a publish error.
    pub fn record_error(topic: &str) {
        counter!("publisher_errors_total", "topic" => topic.to_string()).increment(1);
    }
}

/// Circuit breaker metrics recorder.
pub struct BreakerMetrics;

impl BreakerMetrics {
    /// Record circuit breaker state.
    ///
    /// 0 = Closed, 1 = `HalfOpen`, 2 = Open
    pub fn record_state(breaker: &str, state: State) {
        gauge!("circuit_breaker_state", "breaker" => breaker.to_string()).set(state.as_gauge());
    }

    /// Record a call attempt.
    pub fn record_call(breaker: &str) {
        counter!("circuit_breaker_calls_total", "breaker" => breaker.to_string()).increment(1);
    }

    /// Record a successful call.
    pub fn record_success(breaker: &str) {
        counter!("circuit_breaker_successes_total", "breaker" => breaker.to_string()).increment(1);
    }

    /// Record a failed call.
    pub fn record_failure(breaker: &str) {
        counter!("circuit_breaker_failures_total", "breaker" => breaker.to_string()).increment(1);
    }

    /// Record a rejected call (circuit open).
    pub fn record_rejection(breaker: &str) {
        counter!("circuit_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn render_with(record: impl FnOnce()) -> String {
        let recorder: PrometheusRecorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, record);
        handle.render()
    }

    #[test]
    fn test_metrics_server_creation() {
        #[allow(clippy::unwrap_used)] // Panics: Test will fail if the literal does not parse
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_dispatch_metrics_are_labelled_by_topic() {
        let rendered = render_with(|| {
            DispatchMetrics::record_received("user.created");
            DispatchMetrics::record_received("user.created");
            DispatchMetrics::record_unrouted("orphan");
        });

        assert!(rendered.contains(r#"dispatch_messages_received_total{topic="user.created"} 2"#));
        assert!(rendered.contains(r#"dispatch_messages_unrouted_total{topic="orphan"} 1"#));
    }

    #[test]
    fn test_circuit_breaker_state_gauge() {
        let rendered = render_with(|| {
            BreakerMetrics::record_state("publisher", State::Open);
            BreakerMetrics::record_rejection("publisher");
        });

        assert!(rendered.contains(r#"circuit_breaker_state{breaker="publisher"} 2"#));
        assert!(rendered.contains(r#"circuit_breaker_rejections_total{breaker="publisher"} 1"#));
    }

    #[test]
    fn test_retry_and_dead_letter_metrics() {
        let rendered = render_with(|| {
            RetryMetrics::record_attempt();
            RetryMetrics::record_exhausted();
            DeadLetterMetrics::record_sent("dead-letter");
        });

        assert!(rendered.contains("retry_attempts_total 1"));
        assert!(rendered.contains("retry_exhausted_total 1"));
        assert!(rendered.contains(r#"dead_letter_records_total{topic="dead-letter"} 1"#));
    }
}
