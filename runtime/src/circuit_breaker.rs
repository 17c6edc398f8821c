//! Circuit breaker pattern for preventing cascading failures.
//!
//! A circuit breaker monitors operations and "opens" (stops allowing requests) when
//! consecutive failures reach a threshold, so a failing dependency is not hammered
//! while it recovers.
//!
//! # States
//!
//! - **Closed**: Normal operation. Requests pass through. Consecutive failures are counted.
//! - **Open**: Threshold reached. Requests fail immediately for `break_duration`.
//! - **HalfOpen**: The break elapsed. Exactly one probe request is let through;
//!   success closes the circuit, failure re-opens it and restarts the break.
//!
//! All transitions happen under a single mutex, so one breaker can be shared by
//! concurrent callers.
//!
//! # Example
//!
//! ```rust
//! use courier_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder()
//!         .name("orders-producer")
//!         .failure_threshold(3)
//!         .break_duration(Duration::from_secs(30))
//!         .build(),
//! );
//!
//! let sent = breaker.call(|| async { Ok::<_, String>(()) }).await;
//! if let Err(CircuitBreakerError::Open) = sent {
//!     // broker considered down, skip without calling it
//! }
//! # }
//! ```

use crate::metrics::BreakerMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Name used in logs and metric labels
    pub name: String,
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    ///
    /// Defaults: threshold 3, break 30 seconds.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            name: None,
            failure_threshold: 3,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    name: Option<String>,
    failure_threshold: u32,
    break_duration: Duration,
}

impl CircuitBreakerConfigBuilder {
    /// Set the breaker name used in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the failure threshold.
    ///
    /// Circuit opens after this many consecutive failures. Clamped to at least 1.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open.
    #[must_use]
    pub const fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: self.name.unwrap_or_else(|| "default".to_string()),
            failure_threshold: self.failure_threshold.max(1),
            break_duration: self.break_duration,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, one probe tests whether the dependency recovered
    HalfOpen,
}

impl State {
    /// Gauge value: 0 = Closed, 1 = `HalfOpen`, 2 = Open.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request rejected without running the operation
    #[error("Circuit breaker is open")]
    Open,
    /// Operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct CircuitState {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    // Bumped on every transition; outcomes from an older generation are stale
    generation: u64,
}

/// Circuit breaker for preventing cascading failures.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitState>>,
    // Metrics
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitState {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The configuration this breaker was built with.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker.
    ///
    /// An open circuit whose break has elapsed reports `HalfOpen`: the next
    /// call will be admitted as the probe.
    #[must_use]
    pub fn state(&self) -> State {
        let state = self.lock();
        match state.state {
            State::Open if self.break_elapsed(&state) => State::HalfOpen,
            other => other,
        }
    }

    /// Number of consecutive failures recorded since the circuit last closed.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Call an operation through the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the circuit is open (the
    /// operation is not run).
    /// Returns `CircuitBreakerError::Inner` if the operation fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        BreakerMetrics::record_call(&self.config.name);

        let Some(permit) = self.acquire() else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            BreakerMetrics::record_rejection(&self.config.name);
            tracing::warn!(breaker = %self.config.name, "Circuit breaker is OPEN, rejecting request");
            return Err(CircuitBreakerError::Open);
        };

        let outcome = operation().await;
        let generation = permit.disarm();

        match outcome {
            Ok(result) => {
                self.on_success(generation);
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                BreakerMetrics::record_success(&self.config.name);
                Ok(result)
            }
            Err(err) => {
                self.on_failure(generation);
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                BreakerMetrics::record_failure(&self.config.name);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        // State stays consistent across a poisoned lock: every write is a plain field store.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn break_elapsed(&self, state: &CircuitState) -> bool {
        state
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.config.break_duration)
    }

    fn transition(&self, state: &mut CircuitState, to: State) {
        state.state = to;
        state.generation += 1;
        BreakerMetrics::record_state(&self.config.name, to);
    }

    /// Decide whether a call may proceed; returns a permit when it may.
    fn acquire(&self) -> Option<CallPermit<'_>> {
        let mut state = self.lock();

        match state.state {
            State::Closed => Some(CallPermit::passthrough(self, state.generation)),
            State::Open => {
                if !self.break_elapsed(&state) {
                    return None;
                }
                tracing::info!(breaker = %self.config.name, "Circuit breaker transitioning OPEN -> HALF_OPEN");
                self.transition(&mut state, State::HalfOpen);
                state.probe_in_flight = true;
                Some(CallPermit::probe(self, state.generation))
            }
            State::HalfOpen => {
                if state.probe_in_flight {
                    return None;
                }
                state.probe_in_flight = true;
                Some(CallPermit::probe(self, state.generation))
            }
        }
    }

    /// Whether an outcome from a call admitted in `generation` still applies.
    fn is_current(&self, state: &CircuitState, generation: u64) -> bool {
        if state.generation == generation {
            return true;
        }
        tracing::debug!(
            breaker = %self.config.name,
            admitted = generation,
            current = state.generation,
            "Ignoring outcome of a call admitted before the last transition"
        );
        false
    }

    fn on_success(&self, generation: u64) {
        let mut state = self.lock();
        if !self.is_current(&state, generation) {
            return;
        }

        match state.state {
            State::Closed => {
                state.consecutive_failures = 0;
            }
            State::HalfOpen => {
                tracing::info!(breaker = %self.config.name, "Circuit breaker transitioning HALF_OPEN -> CLOSED");
                self.transition(&mut state, State::Closed);
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.probe_in_flight = false;
            }
            State::Open => {}
        }
    }

    fn on_failure(&self, generation: u64) {
        let mut state = self.lock();
        if !self.is_current(&state, generation) {
            return;
        }

        match state.state {
            State::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.config.name,
                        failures = state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        break_secs = self.config.break_duration.as_secs_f64(),
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    self.transition(&mut state, State::Open);
                    state.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                tracing::warn!(breaker = %self.config.name, "Circuit breaker transitioning HALF_OPEN -> OPEN (probe failed)");
                self.transition(&mut state, State::Open);
                state.consecutive_failures += 1;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
            }
            State::Open => {}
        }
    }

    /// Get circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker to closed state.
    ///
    /// Useful for testing or manual intervention.
    pub fn reset(&self) {
        let mut state = self.lock();
        tracing::info!(breaker = %self.config.name, "Circuit breaker manually reset to CLOSED");
        self.transition(&mut state, State::Closed);
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
    }
}

/// Admission ticket for one call, stamped with the generation it was
/// admitted in.
///
/// A probe permit releases the half-open slot if the call is dropped before
/// it reports an outcome.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    armed_probe: bool,
}

impl<'a> CallPermit<'a> {
    const fn passthrough(breaker: &'a CircuitBreaker, generation: u64) -> Self {
        Self {
            breaker,
            generation,
            armed_probe: false,
        }
    }

    const fn probe(breaker: &'a CircuitBreaker, generation: u64) -> Self {
        Self {
            breaker,
            generation,
            armed_probe: true,
        }
    }

    /// The call reported an outcome; returns the admission generation.
    fn disarm(mut self) -> u64 {
        self.armed_probe = false;
        self.generation
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.armed_probe {
            return;
        }
        let mut state = self.breaker.lock();
        if state.generation == self.generation {
            state.probe_in_flight = false;
        }
    }
}

/// Metrics for circuit breaker monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls attempted
    pub total_calls: u64,
    /// Total number of successful calls
    pub total_successes: u64,
    /// Total number of failed calls
    pub total_failures: u64,
    /// Total number of rejected calls (circuit open)
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Calculate success rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_calls as f64
    }

    /// Calculate rejection rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_rejections as f64 / self.total_calls as f64
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn breaker(threshold: u32, break_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_threshold(threshold)
                .break_duration(Duration::from_millis(break_ms))
                .build(),
        )
    }

    async fn trip(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            let _ = breaker.call(|| async { Err::<i32, _>("error") }).await;
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;

        assert_eq!(result, Ok(42));
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker(3, 1000);

        trip(&breaker, 2).await;
        let _ = breaker.call(|| async { Ok::<_, String>(()) }).await;
        trip(&breaker, 2).await;

        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_threshold() {
        let breaker = breaker(3, 30_000);

        trip(&breaker, 3).await;

        assert_eq!(breaker.state(), State::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_run_operation() {
        let breaker = breaker(2, 30_000);
        trip(&breaker, 2).await;

        let ran = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            })
            .await;

        assert_eq!(result, Err(CircuitBreakerError::Open));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes_circuit() {
        let breaker = breaker(2, 100);
        trip(&breaker, 2).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.state(), State::HalfOpen);

        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;

        assert_eq!(result, Ok(42));
        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_and_restarts_break() {
        let breaker = breaker(2, 100);
        trip(&breaker, 2).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        trip(&breaker, 1).await;
        assert_eq!(breaker.state(), State::Open);

        // The break restarted at the probe failure, not at the original trip
        tokio::time::sleep(Duration::from_millis(50)).await;
        let rejected = breaker.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(rejected, Err(CircuitBreakerError::Open));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let admitted = breaker.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(admitted, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_one_probe() {
        let breaker = Arc::new(breaker(1, 100));
        trip(&breaker, 1).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = release_rx.await;
                        Ok::<_, String>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let concurrent = breaker.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(concurrent, Err(CircuitBreakerError::Open));

        let _ = release_tx.send(());
        assert!(matches!(probe.await, Ok(Ok(()))));
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let breaker = breaker(1, 100);
        trip(&breaker, 1).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stalled = breaker.call(|| std::future::pending::<Result<(), String>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), stalled).await;
        assert!(timed_out.is_err());

        let next = breaker.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(next, Ok(()));
    }

    type GatedCall = tokio::task::JoinHandle<Result<(), CircuitBreakerError<String>>>;

    /// Start a call that holds its permit until the returned sender fires
    /// with the outcome it should report.
    async fn gated_call(
        breaker: &Arc<CircuitBreaker>,
    ) -> (tokio::sync::oneshot::Sender<Result<(), String>>, GatedCall) {
        let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel::<Result<(), String>>();
        let breaker = Arc::clone(breaker);
        let handle = tokio::spawn(async move {
            breaker
                .call(|| async move { outcome_rx.await.unwrap_or(Ok(())) })
                .await
        });
        tokio::task::yield_now().await;
        (outcome_tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_from_closed_call_does_not_close_half_open() {
        let breaker = Arc::new(breaker(2, 100));
        let (slow_tx, slow) = gated_call(&breaker).await;

        trip(&breaker, 2).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let (half_open_tx, half_open) = gated_call(&breaker).await;

        slow_tx.send(Ok(())).unwrap();
        assert!(matches!(slow.await, Ok(Ok(()))));

        assert_eq!(breaker.state(), State::HalfOpen);
        let concurrent = breaker.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(concurrent, Err(CircuitBreakerError::Open));

        half_open_tx.send(Ok(())).unwrap();
        assert!(matches!(half_open.await, Ok(Ok(()))));
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_from_closed_call_does_not_reopen_half_open() {
        let breaker = Arc::new(breaker(2, 100));
        let (slow_tx, slow) = gated_call(&breaker).await;

        trip(&breaker, 2).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let (half_open_tx, half_open) = gated_call(&breaker).await;

        slow_tx.send(Err("late".to_string())).unwrap();
        assert!(matches!(slow.await, Ok(Err(CircuitBreakerError::Inner(_)))));

        assert_eq!(breaker.state(), State::HalfOpen);
        assert_eq!(breaker.consecutive_failures(), 2);

        half_open_tx.send(Ok(())).unwrap();
        assert!(matches!(half_open.await, Ok(Ok(()))));
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_late_outcome_after_reset_is_ignored() {
        let breaker = Arc::new(breaker(1, 30_000));
        let (slow_tx, slow) = gated_call(&breaker).await;

        breaker.reset();
        slow_tx.send(Err("late".to_string())).unwrap();
        let _ = slow.await;

        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_metrics() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::builder().failure_threshold(5).build());

        for _ in 0..3 {
            let _ = breaker.call(|| async { Ok::<_, String>(42) }).await;
        }
        trip(&breaker, 2).await;

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 5);
        assert_eq!(metrics.total_successes, 3);
        assert_eq!(metrics.total_failures, 2);
        assert!((metrics.success_rate() - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_circuit_breaker_reset() {
        let breaker = breaker(2, 30_000);
        trip(&breaker, 2).await;
        assert_eq!(breaker.state(), State::Open);

        breaker.reset();

        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_concurrent_calls() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..100 {
            let breaker_clone = Arc::clone(&breaker);
            let counter_clone = Arc::clone(&counter);

            handles.push(tokio::spawn(async move {
                let _ = breaker_clone
                    .call(|| async {
                        counter_clone.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await;
            }));
        }

        for handle in handles {
            handle.await.ok();
        }

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 100);
        assert_eq!(metrics.total_successes, 100);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
