//! JSONL conversation recorder.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{RecordedMessage, Recorder};
use crate::{AppError, Result};

/// Records inbound messages to a JSONL file, one record per line.
///
/// The file is truncated on creation.  Every record is serialised, written,
/// and flushed while the lock is held, so a crash after N records leaves N
/// complete lines.
#[derive(Debug)]
pub struct FileRecorder {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileRecorder {
    /// Create (or truncate) the recording file at `path`.
    ///
    /// Parent directories are created when missing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Record`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Record(format!(
                    "failed to create recording directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let file = File::create(&path).map_err(|e| {
            AppError::Record(format!("failed to create recording {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), "recorder: recording opened");
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// Path of the recording file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Recorder for FileRecorder {
    fn record_message(&self, data: &Map<String, Value>) -> Result<()> {
        let record = RecordedMessage::now(data.clone());
        let line = serde_json::to_string(&record)
            .map_err(|e| AppError::Record(format!("failed to serialize record: {e}")))?;

        let mut guard = self
            .writer
            .lock()
            .map_err(|_| AppError::Record("recorder mutex poisoned".to_owned()))?;

        let Some(writer) = guard.as_mut() else {
            return Err(AppError::Record("recorder is closed".into()));
        };

        if let Err(e) = writeln!(writer, "{line}") {
            warn!("failed to write recording entry: {e}");
            return Err(AppError::Record(format!("record write failed: {e}")));
        }
        if let Err(e) = writer.flush() {
            warn!("failed to flush recording: {e}");
            return Err(AppError::Record(format!("record flush failed: {e}")));
        }

        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| AppError::Record("recorder mutex poisoned".to_owned()))?;

        let Some(mut writer) = guard.take() else {
            return Ok(());
        };

        writer
            .flush()
            .map_err(|e| AppError::Record(format!("record flush failed: {e}")))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| AppError::Record(format!("record sync failed: {e}")))?;

        debug!(path = %self.path.display(), "recorder: recording closed");
        Ok(())
    }
}
