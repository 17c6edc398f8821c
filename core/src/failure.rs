//! Dead-letter failure records.
//!
//! A [`FailureRecord`] is created once per dispatch exhaustion and published
//! as the payload of a message on the `dead-letter` topic. The encoding is
//! JSON with PascalCase keys so records stay human-diffable and readable by
//! non-Rust consumers:
//!
//! ```json
//! {"OriginalMessage":"{...}","Error":"duplicate email","FailedAt":"2025-01-01T00:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record describing a message that permanently failed processing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailureRecord {
    /// The payload exactly as it was dispatched.
    pub original_message: String,

    /// Description of the final error.
    pub error: String,

    /// When the failure was recorded (ISO-8601 / RFC 3339).
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    /// Create a new failure record.
    #[must_use]
    pub fn new(
        original_message: impl Into<String>,
        error: impl Into<String>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            original_message: original_message.into(),
            error: error.into(),
            failed_at,
        }
    }

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if the bytes are not a
    /// valid record.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
