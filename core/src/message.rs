//! Inbound broker messages.
//!
//! A [`Message`] is owned transiently by the consumer loop for the duration of
//! one dispatch. It has no identity beyond the broker's own offset
//! bookkeeping, which is carried along only for log correlation.

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::fmt;

/// A message received from a broker topic.
///
/// Immutable once received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    topic: String,
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    partition: i32,
    offset: i64,
    received_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with no key and unknown partition/offset.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_core::message::Message;
    /// use chrono::Utc;
    ///
    /// let msg = Message::new("user.created", br#"{"Id":"1"}"#.to_vec(), Utc::now());
    /// assert_eq!(msg.topic(), "user.created");
    /// assert_eq!(msg.partition(), -1);
    /// ```
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, received_at: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
            partition: -1,
            offset: -1,
            received_at,
        }
    }

    /// Attach a partitioning key.
    #[must_use]
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach the broker position the message was read from.
    #[must_use]
    pub const fn with_position(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Topic the message was read from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Optional partitioning key.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload decoded as UTF-8.
    ///
    /// Invalid sequences are replaced with `U+FFFD`, matching what a string
    /// deserializer on the wire would hand to the handler.
    #[must_use]
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Partition the message was read from (`-1` when unknown).
    #[must_use]
    pub const fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset within the partition (`-1` when unknown).
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// When the consumer received the message.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ topic: {}, partition: {}, offset: {}, size: {} bytes }}",
            self.topic,
            self.partition,
            self.offset,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_str_replaces_invalid_utf8() {
        let msg = Message::new("t", vec![b'o', b'k', 0xFF], Utc::now());
        assert_eq!(msg.payload_str(), "ok\u{FFFD}");
    }

    #[test]
    fn builder_methods_set_key_and_position() {
        let msg = Message::new("orders", vec![1], Utc::now())
            .with_key(b"k1".to_vec())
            .with_position(3, 42);

        assert_eq!(msg.key(), Some(&b"k1"[..]));
        assert_eq!(msg.partition(), 3);
        assert_eq!(msg.offset(), 42);
    }

    #[test]
    fn display_includes_topic_and_size() {
        let msg = Message::new("user.created", vec![0; 5], Utc::now());
        let display = format!("{msg}");
        assert!(display.contains("user.created"));
        assert!(display.contains("5 bytes"));
    }
}
