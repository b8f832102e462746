//! Replay transport.
//!
//! Reads a JSONL recording produced by
//! [`FileRecorder`](crate::recorder::FileRecorder) and rebuilds the inbound
//! stream from the `data` field of each record, byte for byte, one payload
//! per line.  Lines that are blank, not JSON, or lack `data` are skipped.
//!
//! Everything written to the replay transport is discarded: a replay has no
//! live peer, so outbound traffic is inert.

use std::future::Future;
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;

use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::{debug, info};

use super::{BoxReader, BoxWriter, TransportProvider};
use crate::{AppError, Result};

/// A recording line, borrowing the raw `data` payload.
#[derive(Deserialize)]
struct ReplayLine<'a> {
    #[serde(borrow)]
    data: Option<&'a RawValue>,
}

/// Transport that serves a recorded conversation.
#[derive(Debug)]
pub struct ReplayProvider {
    buffer: Option<Vec<u8>>,
    messages: usize,
}

impl ReplayProvider {
    /// Load the recording at `path`.
    ///
    /// The file is read as raw bytes, so a corrupted line (even one that is
    /// not UTF-8) only loses that line.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the file cannot be read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await.map_err(|err| {
            AppError::Transport(format!(
                "failed to read recording {}: {err}",
                path.display()
            ))
        })?;

        let provider = Self::from_bytes(&raw);
        info!(
            path = %path.display(),
            messages = provider.messages,
            "replay: recording loaded"
        );
        Ok(provider)
    }

    /// Build a provider from recording text already in memory.
    #[must_use]
    pub fn from_recording(raw: &str) -> Self {
        Self::from_bytes(raw.as_bytes())
    }

    /// Build a provider from recording bytes already in memory.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(raw.len());
        let mut messages = 0;

        for (index, line) in raw.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<ReplayLine<'_>>(line) {
                Ok(ReplayLine { data: Some(data) }) => {
                    buffer.extend_from_slice(data.get().as_bytes());
                    buffer.push(b'\n');
                    messages += 1;
                }
                Ok(ReplayLine { data: None }) => {
                    debug!(line = index + 1, "replay: record has no data, skipping");
                }
                Err(err) => {
                    debug!(line = index + 1, error = %err, "replay: malformed record, skipping");
                }
            }
        }

        Self {
            buffer: Some(buffer),
            messages,
        }
    }

    /// Number of payloads the replay will deliver.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages
    }
}

impl TransportProvider for ReplayProvider {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn reader(&mut self) -> Result<BoxReader> {
        self.buffer
            .take()
            .map(|buf| Box::new(Cursor::new(buf)) as BoxReader)
            .ok_or_else(|| AppError::Transport("replay stream already taken".into()))
    }

    fn writer(&mut self) -> Result<BoxWriter> {
        Ok(Box::new(tokio::io::sink()))
    }

    fn is_replay(&self) -> bool {
        true
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
