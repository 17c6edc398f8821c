//! Handler capability supplied by the host application.
//!
//! A [`Handler`] is bound to exactly one topic and processes the decoded
//! payload of each message received on it. Failure policy (retries,
//! dead-lettering) is not the handler's concern; it only reports what went
//! wrong through [`HandlerError`].

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors a handler reports for a single processing attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload could not be decoded; retrying cannot help
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Business rule rejected the message (e.g. duplicate entity)
    #[error("{0}")]
    Rejected(String),

    /// Processing failed for another reason
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Whether another attempt may succeed.
    ///
    /// Malformed payloads fail fast; everything else burns the retry budget.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::MalformedPayload(_))
    }
}

/// Boxed future returned by [`Handler::handle`].
pub type HandleFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Application code bound to one topic.
///
/// Handlers must be idempotent: delivery is at-least-once, so the same
/// payload may be handled more than once after a restart.
///
/// # Example
///
/// ```
/// use courier_core::handler::{HandleFuture, Handler, HandlerError};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     fn topic(&self) -> &str {
///         "echo"
///     }
///
///     fn handle<'a>(&'a self, payload: &'a str) -> HandleFuture<'a> {
///         Box::pin(async move {
///             if payload.is_empty() {
///                 return Err(HandlerError::MalformedPayload("empty".into()));
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync {
    /// Topic this handler consumes.
    fn topic(&self) -> &str;

    /// Process one payload.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] describing why this attempt failed.
    fn handle<'a>(&'a self, payload: &'a str) -> HandleFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_is_not_retryable() {
        assert!(!HandlerError::MalformedPayload("eof".into()).is_retryable());
        assert!(HandlerError::Rejected("duplicate".into()).is_retryable());
        assert!(HandlerError::Failed("db down".into()).is_retryable());
    }

    #[test]
    fn application_errors_display_their_message_verbatim() {
        assert_eq!(
            HandlerError::Failed("boom".into()).to_string(),
            "boom"
        );
        assert_eq!(
            HandlerError::MalformedPayload("eof".into()).to_string(),
            "Malformed payload: eof"
        );
    }
}
