//! ACP connection: one session over one transport.
//!
//! A [`Connection`] owns exactly one [`TransportProvider`] and at most one
//! [`Recorder`].  It moves through
//! [`Unstarted`](ConnectionState::Unstarted) →
//! [`Initialized`](ConnectionState::Initialized) →
//! [`Streaming`](ConnectionState::Streaming) →
//! [`Closed`](ConnectionState::Closed).  Replay connections never
//! initialize; they stream without a session id.
//!
//! Outbound messages share one framed writer behind an async mutex, so a
//! permission handler running inside the receive loop can reply while the
//! interaction driver holds no lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::acp::codec::{AcpCodec, MAX_LINE_BYTES};
use crate::acp::router::{route_message, Completion, Handler};
use crate::acp::types::{
    RequestId, SessionNewRequest, SessionPromptRequest, ToolPermissionResponse,
};
use crate::config::GlobalConfig;
use crate::recorder::{FileRecorder, Recorder};
use crate::transport::{
    BoxReader, BoxWriter, ProcessProvider, ReplayProvider, TransportProvider,
};
use crate::{AppError, Result};

/// Default wait for the handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables applied when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// `cwd` sent in the handshake; `None` means the current directory.
    pub cwd: Option<PathBuf>,
    /// Maximum wait for the handshake reply; `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Inbound line limit passed to [`AcpCodec`].
    pub max_line_bytes: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl From<&GlobalConfig> for ConnectionOptions {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            cwd: config.workspace_root.clone(),
            handshake_timeout: config.handshake_timeout(),
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// Lifecycle phase of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport started; no handshake yet.
    Unstarted,
    /// Handshake complete; a session id is held.
    Initialized,
    /// The receive loop owns the inbound stream.
    Streaming,
    /// Recorder and transport released.
    Closed,
}

#[derive(Debug)]
struct SessionState {
    phase: ConnectionState,
    session_id: Option<String>,
}

/// A session with an agent over a [`TransportProvider`].
pub struct Connection {
    provider: AsyncMutex<Option<Box<dyn TransportProvider>>>,
    reader: AsyncMutex<Option<FramedRead<BoxReader, AcpCodec>>>,
    writer: AsyncMutex<Option<FramedWrite<BoxWriter, AcpCodec>>>,
    recorder: Mutex<Option<Arc<dyn Recorder>>>,
    state: Mutex<SessionState>,
    replay: bool,
    options: ConnectionOptions,
}

impl Connection {
    /// Start `provider` and take its streams, using default options.
    ///
    /// # Errors
    ///
    /// Returns the provider's start error; nothing is held on failure.
    pub fn open(provider: Box<dyn TransportProvider>) -> Result<Self> {
        Self::open_with(provider, ConnectionOptions::default())
    }

    /// Start `provider` and take its streams.
    ///
    /// # Errors
    ///
    /// Returns the provider's start error, or a transport error if either
    /// stream is unavailable.  The provider is dropped on failure.
    pub fn open_with(
        mut provider: Box<dyn TransportProvider>,
        options: ConnectionOptions,
    ) -> Result<Self> {
        provider.start()?;
        let reader = provider.reader()?;
        let writer = provider.writer()?;
        let replay = provider.is_replay();

        Ok(Self {
            reader: AsyncMutex::new(Some(FramedRead::new(
                reader,
                AcpCodec::with_max_line_bytes(options.max_line_bytes),
            ))),
            writer: AsyncMutex::new(Some(FramedWrite::new(writer, AcpCodec::new()))),
            provider: AsyncMutex::new(Some(provider)),
            recorder: Mutex::new(None),
            state: Mutex::new(SessionState {
                phase: ConnectionState::Unstarted,
                session_id: None,
            }),
            replay,
            options,
        })
    }

    /// Spawn `command` and talk to it over stdio.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the process cannot be launched.
    pub fn open_stdio(command: &str, args: Vec<String>) -> Result<Self> {
        Self::open(Box::new(ProcessProvider::new(command, args)))
    }

    /// Spawn `command` and record every inbound message to `recording_file`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the process cannot be launched or
    /// [`AppError::Record`] if the recording cannot be created; in the latter
    /// case the process is shut down first.
    pub async fn open_recording(
        command: &str,
        args: Vec<String>,
        recording_file: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::open_stdio(command, args)?
            .attach_recording(recording_file)
            .await
    }

    /// Replay the inbound side of `recording_file`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the recording cannot be read.
    pub async fn open_replay(recording_file: impl AsRef<Path>) -> Result<Self> {
        let provider = ReplayProvider::open(recording_file).await?;
        Self::open(Box::new(provider))
    }

    /// Attach a [`FileRecorder`] writing to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Record`] if the file cannot be created; the
    /// connection is closed before the error is returned.
    pub async fn attach_recording(self, path: impl AsRef<Path>) -> Result<Self> {
        match FileRecorder::create(path) {
            Ok(recorder) => Ok(self.with_recorder(Arc::new(recorder))),
            Err(err) => {
                if let Err(close_err) = self.close().await {
                    warn!(error = %close_err, "acp connection: close after recorder failure");
                }
                Err(err)
            }
        }
    }

    /// Record every inbound message through `recorder`, replacing any
    /// recorder attached before.
    #[must_use]
    pub fn with_recorder(self, recorder: Arc<dyn Recorder>) -> Self {
        *lock(&self.recorder) = Some(recorder);
        self
    }

    /// `true` when the connection replays a recording.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    /// Session id obtained from the handshake.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        lock(&self.state).session_id.clone()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.state).phase
    }

    /// Perform the `session/new` handshake and store the session id.
    ///
    /// Reads exactly one message from the inbound stream, which must be an
    /// object whose `result.sessionId` is a string.  The reply is not
    /// recorded.
    ///
    /// # Errors
    ///
    /// - [`AppError::Acp`] on replay connections, on a second call, when the
    ///   inbound stream is already streaming, or when the reply is missing,
    ///   malformed, late, or lacks `result` / a string `sessionId`.
    /// - [`AppError::Transport`] if the request cannot be written.
    pub async fn initialize_session(&self) -> Result<String> {
        if self.replay {
            return Err(AppError::Acp(
                "replay connections do not perform a handshake".into(),
            ));
        }

        match self.state() {
            ConnectionState::Unstarted => {}
            ConnectionState::Initialized => {
                return Err(AppError::Acp("session already initialized".into()));
            }
            ConnectionState::Streaming => {
                return Err(AppError::Acp(
                    "cannot handshake while the receive loop is running".into(),
                ));
            }
            ConnectionState::Closed => {
                return Err(AppError::Acp("connection is closed".into()));
            }
        }

        let cwd = self
            .options
            .cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
        let request = SessionNewRequest::session_new(cwd.to_string_lossy().into_owned());
        self.send_json(&request).await?;
        debug!(cwd = %cwd.display(), "acp connection: session/new sent");

        let reply = {
            let mut guard = self.reader.lock().await;
            let framed = guard.as_mut().ok_or_else(|| {
                AppError::Acp("inbound stream is not available for the handshake".into())
            })?;

            match self.options.handshake_timeout {
                Some(limit) => tokio::time::timeout(limit, next_message(framed))
                    .await
                    .map_err(|_| {
                        AppError::Acp(format!(
                            "handshake timeout: no reply to session/new within {limit:?}"
                        ))
                    })??,
                None => next_message(framed).await?,
            }
        };

        let reply = reply
            .ok_or_else(|| AppError::Acp("agent closed the stream during the handshake".into()))?;
        let session_id = extract_session_id(reply)?;

        {
            let mut state = lock(&self.state);
            if state.phase != ConnectionState::Unstarted {
                return Err(AppError::Acp(format!(
                    "connection changed state during the handshake: {:?}",
                    state.phase
                )));
            }
            state.session_id = Some(session_id.clone());
            state.phase = ConnectionState::Initialized;
        }

        info!(session_id = session_id.as_str(), "acp connection: session initialized");
        Ok(session_id)
    }

    /// Send a `session/prompt` carrying `text`.
    ///
    /// The answer arrives later as a message without a method and is
    /// signalled through the receive loop's [`Completion`] channel.  Wait for
    /// it before sending the next prompt.
    ///
    /// # Errors
    ///
    /// - [`AppError::Acp`] on a live connection without a session.
    /// - [`AppError::Transport`] if the write fails.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let session_id = match self.session_id() {
            Some(id) => id,
            None if self.replay => String::new(),
            None => {
                return Err(AppError::Acp(
                    "no session: initialize_session must succeed before sending prompts".into(),
                ));
            }
        };

        let request = SessionPromptRequest::session_prompt(session_id, text);
        self.send_json(&request).await?;
        debug!(bytes = text.len(), "acp connection: session/prompt sent");
        Ok(())
    }

    /// Answer the permission request `request_id` with `option_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the write fails.
    pub async fn send_tool_response(&self, request_id: RequestId, option_id: &str) -> Result<()> {
        let response = ToolPermissionResponse::selected(request_id.clone(), option_id);
        self.send_json(&response).await?;
        debug!(%request_id, option_id, "acp connection: permission decision sent");
        Ok(())
    }

    /// Decode inbound messages until end of stream, recording and routing
    /// each in arrival order.
    ///
    /// Returns `Ok(())` at end of stream.
    ///
    /// # Errors
    ///
    /// - [`AppError::Acp`] if a line is not a JSON object, exceeds the line
    ///   limit, or a known method's payload is malformed, or if the loop is
    ///   already running.
    /// - [`AppError::Record`] if recording fails.
    /// - Any error returned by `handler`.
    pub async fn stream_responses(
        &self,
        handler: &dyn Handler,
        done: mpsc::Sender<Completion>,
    ) -> Result<()> {
        let mut framed = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::Acp("inbound stream already consumed".into()))?;

        {
            let mut state = lock(&self.state);
            if state.phase != ConnectionState::Closed {
                state.phase = ConnectionState::Streaming;
            }
        }
        debug!("acp connection: receive loop started");

        while let Some(message) = next_message(&mut framed).await? {
            let recorder = lock(&self.recorder).clone();
            if let Some(recorder) = recorder {
                recorder.record_message(&message)?;
            }

            route_message(handler, &done, self, message).await?;
        }

        info!("acp connection: inbound stream ended");
        Ok(())
    }

    /// Close the recorder, then the transport.
    ///
    /// Both steps are always attempted; the first error is returned.  A
    /// second call finds nothing left to close and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the first recorder or transport close error.
    pub async fn close(&self) -> Result<()> {
        let mut first_err = None;

        let recorder = lock(&self.recorder).take();
        if let Some(recorder) = recorder {
            if let Err(err) = recorder.close() {
                warn!(error = %err, "acp connection: recorder close failed");
                first_err = Some(err);
            }
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(err) = writer.close().await {
                debug!(error = %err, "acp connection: outbound stream close failed");
            }
        }

        let provider = self.provider.lock().await.take();
        if let Some(mut provider) = provider {
            if let Err(err) = provider.close().await {
                warn!(error = %err, "acp connection: transport close failed");
                first_err.get_or_insert(err);
            }
        }

        let was_open = {
            let mut state = lock(&self.state);
            let was_open = state.phase != ConnectionState::Closed;
            state.phase = ConnectionState::Closed;
            was_open
        };
        if was_open {
            info!("acp connection: closed");
        }

        first_err.map_or(Ok(()), Err)
    }

    async fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)
            .map_err(|e| AppError::Acp(format!("failed to serialise outbound message: {e}")))?;

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| AppError::Transport("connection is closed".into()))?;

        writer.send(line).await.map_err(|e| {
            warn!(error = %e, "acp connection: write failed");
            AppError::Transport(format!("write failed: {e}"))
        })
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read the next non-blank line and decode it as a JSON object.
///
/// Returns `Ok(None)` at end of stream.
async fn next_message(
    framed: &mut FramedRead<BoxReader, AcpCodec>,
) -> Result<Option<Map<String, Value>>> {
    loop {
        let Some(line) = framed.next().await.transpose()? else {
            return Ok(None);
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        return serde_json::from_str::<Map<String, Value>>(trimmed)
            .map(Some)
            .map_err(|e| AppError::Acp(format!("malformed json: {e}")));
    }
}

/// Pull `result.sessionId` out of a handshake reply.
fn extract_session_id(mut reply: Map<String, Value>) -> Result<String> {
    let Some(result) = reply.remove("result") else {
        return Err(AppError::Acp(format!(
            "handshake reply missing result: {}",
            Value::Object(reply)
        )));
    };

    match result.get("sessionId") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(other) => Err(AppError::Acp(format!(
            "handshake sessionId must be a string, got {other}"
        ))),
        None => Err(AppError::Acp(format!(
            "handshake result missing sessionId: {result}"
        ))),
    }
}
