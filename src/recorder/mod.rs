//! Conversation recording.
//!
//! Provides the [`Recorder`] trait and the [`RecordedMessage`] line format.
//! The primary implementation, [`FileRecorder`], appends one JSON record per
//! inbound message to a JSONL file that
//! [`ReplayProvider`](crate::transport::ReplayProvider) can later replay.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One recorded inbound message.
///
/// Serialised as `{"timestamp": "<RFC 3339>", "data": {…}}` on its own line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedMessage {
    /// Wall-clock time the message was recorded.
    pub timestamp: DateTime<Utc>,
    /// The decoded message exactly as received.
    pub data: Map<String, Value>,
}

impl RecordedMessage {
    /// Stamp `data` with the current time.
    #[must_use]
    pub fn now(data: Map<String, Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Durable, append-only log of inbound messages.
///
/// Implementations must be [`Send`] and [`Sync`]: the receive loop and
/// other tasks may record through a shared reference.
pub trait Recorder: Send + Sync {
    /// Append `data` as a single timestamped record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Record`](crate::AppError::Record) if the record
    /// cannot be written or the recorder is closed.
    fn record_message(&self, data: &Map<String, Value>) -> crate::Result<()>;

    /// Flush and release the underlying storage.  Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Record`](crate::AppError::Record) if the final
    /// flush fails.
    fn close(&self) -> crate::Result<()>;
}

pub use writer::FileRecorder;
