//! Handler doubles.
//!
//! - [`ScriptedHandler`]: plays back a fixed sequence of outcomes and counts calls
//! - [`RecordingHandler`]: succeeds and forwards every payload to a channel

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use courier_core::handler::{HandleFuture, Handler, HandlerError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Script {
    outcomes: VecDeque<Result<(), HandlerError>>,
    fallback: Option<HandlerError>,
    payloads: Vec<String>,
}

/// Handler that plays back scripted outcomes.
///
/// Clones share the script and the call log, so a test can keep one clone
/// for assertions after handing the other to a registry.
///
/// # Example
///
/// ```
/// use courier_core::handler::{Handler, HandlerError};
/// use courier_testing::ScriptedHandler;
///
/// # async fn example() {
/// let handler = ScriptedHandler::failing_times("user.created", 1, HandlerError::Failed("db".into()));
///
/// assert!(handler.handle("{}").await.is_err());
/// assert!(handler.handle("{}").await.is_ok());
/// assert_eq!(handler.calls(), 2);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedHandler {
    topic: String,
    script: Arc<Mutex<Script>>,
}

impl ScriptedHandler {
    /// Handler that always succeeds.
    #[must_use]
    pub fn succeeding(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Handler that fails every attempt with `error`.
    #[must_use]
    pub fn always_failing(topic: impl Into<String>, error: HandlerError) -> Self {
        let handler = Self::succeeding(topic);
        handler.script.lock().unwrap().fallback = Some(error);
        handler
    }

    /// Handler that fails the first `times` attempts with `error`, then succeeds.
    #[must_use]
    pub fn failing_times(topic: impl Into<String>, times: usize, error: HandlerError) -> Self {
        let handler = Self::succeeding(topic);
        handler
            .script
            .lock()
            .unwrap()
            .outcomes
            .extend(std::iter::repeat_n(Err(error), times));
        handler
    }

    /// Number of times `handle` was invoked.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().payloads.len()
    }

    /// Payloads seen, in call order.
    #[must_use]
    pub fn payloads(&self) -> Vec<String> {
        self.script.lock().unwrap().payloads.clone()
    }
}

impl Handler for ScriptedHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn handle<'a>(&'a self, payload: &'a str) -> HandleFuture<'a> {
        let outcome = {
            let mut script = self.script.lock().unwrap();
            script.payloads.push(payload.to_string());
            script
                .outcomes
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone().map_or(Ok(()), Err))
        };
        Box::pin(async move { outcome })
    }
}

/// Handler that succeeds and forwards every payload it sees.
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    topic: String,
    seen: mpsc::UnboundedSender<String>,
}

impl RecordingHandler {
    /// Create a handler for `topic` and the receiver its payloads arrive on.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (
            Self {
                topic: topic.into(),
                seen,
            },
            rx,
        )
    }
}

impl Handler for RecordingHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn handle<'a>(&'a self, payload: &'a str) -> HandleFuture<'a> {
        // A closed receiver means the test stopped listening; the payload is still handled.
        let _ = self.seen.send(payload.to_string());
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_failing_handler_keeps_failing() {
        let handler = ScriptedHandler::always_failing("t", HandlerError::Rejected("dup".into()));

        for _ in 0..3 {
            assert_eq!(
                handler.handle("p").await,
                Err(HandlerError::Rejected("dup".into()))
            );
        }
        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test]
    async fn clones_share_the_call_log() {
        let handler = ScriptedHandler::succeeding("t");
        let observer = handler.clone();

        handler.handle("one").await.unwrap();
        handler.handle("two").await.unwrap();

        assert_eq!(observer.payloads(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn recording_handler_forwards_payloads() {
        let (handler, mut rx) = RecordingHandler::new("t");

        handler.handle("hello").await.unwrap();

        assert_eq!(rx.recv().await, Some("hello".to_string()));
        assert_eq!(handler.topic(), "t");
    }
}
