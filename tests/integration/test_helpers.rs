//! Shared helpers for connection-level integration tests.
//!
//! [`duplex_transport`] gives a connection an in-memory transport and hands
//! the test the agent's side of both pipes, so tests can script the agent
//! line by line without spawning a process.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

use agent_tether::acp::types::{SessionRequestPermissionRequest, SessionUpdateRequest};
use agent_tether::acp::{Connection, Handler, HandlerFuture};
use agent_tether::transport::{BoxReader, BoxWriter, TransportProvider};
use agent_tether::{AppError, Result};

const PIPE_CAPACITY: usize = 64 * 1024;

/// In-memory transport backed by two `tokio::io::duplex` pipes.
pub struct DuplexProvider {
    reader: Option<DuplexStream>,
    writer: Option<DuplexStream>,
    closes: Arc<AtomicUsize>,
}

impl DuplexProvider {
    /// Number of times `close` has been called, shared with the test.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

impl TransportProvider for DuplexProvider {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn reader(&mut self) -> Result<BoxReader> {
        self.reader
            .take()
            .map(|r| Box::new(r) as BoxReader)
            .ok_or_else(|| AppError::Transport("reader taken".into()))
    }

    fn writer(&mut self) -> Result<BoxWriter> {
        self.writer
            .take()
            .map(|w| Box::new(w) as BoxWriter)
            .ok_or_else(|| AppError::Transport("writer taken".into()))
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// The agent's ends of a [`DuplexProvider`].
pub struct ScriptedAgent {
    inbound: Lines<BufReader<DuplexStream>>,
    outbound: Option<DuplexStream>,
}

impl ScriptedAgent {
    /// Write one raw line to the client.
    pub async fn send_line(&mut self, line: &str) {
        let out = self.outbound.as_mut().expect("agent output still open");
        out.write_all(line.as_bytes()).await.expect("agent write");
        out.write_all(b"\n").await.expect("agent write newline");
    }

    /// Write one JSON message to the client.
    pub async fn send(&mut self, message: Value) {
        self.send_line(&message.to_string()).await;
    }

    /// Read the next JSON message the client wrote, or `None` once the
    /// client's output is closed.
    pub async fn recv(&mut self) -> Option<Value> {
        let line = self.inbound.next_line().await.expect("agent read")?;
        Some(serde_json::from_str(&line).expect("client wrote json"))
    }

    /// Close the agent's output; the client sees end of stream.
    pub fn hang_up(&mut self) {
        self.outbound.take();
    }
}

/// Build a transport and the agent side that talks to it.
pub fn duplex_transport() -> (DuplexProvider, ScriptedAgent) {
    let (client_out, agent_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (agent_out, client_in) = tokio::io::duplex(PIPE_CAPACITY);

    let provider = DuplexProvider {
        reader: Some(client_in),
        writer: Some(client_out),
        closes: Arc::new(AtomicUsize::new(0)),
    };
    let agent = ScriptedAgent {
        inbound: BufReader::new(agent_in).lines(),
        outbound: Some(agent_out),
    };
    (provider, agent)
}

/// Handler that remembers what it saw and answers every permission request
/// with a fixed option.
pub struct RecordingHandler {
    pub updates: Mutex<Vec<String>>,
    pub permissions: Mutex<Vec<String>>,
    answer: String,
}

impl RecordingHandler {
    pub fn answering(option_id: &str) -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            permissions: Mutex::new(Vec::new()),
            answer: option_id.to_owned(),
        }
    }

    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }

    pub fn permissions(&self) -> Vec<String> {
        self.permissions.lock().unwrap().clone()
    }
}

impl Handler for RecordingHandler {
    fn handle_permission_request<'a>(
        &'a self,
        conn: &'a Connection,
        _raw: &'a [u8],
        req: SessionRequestPermissionRequest,
    ) -> HandlerFuture<'a> {
        self.permissions
            .lock()
            .unwrap()
            .push(req.params.tool_call.tool_call_id.clone());
        Box::pin(async move { conn.send_tool_response(req.id, &self.answer).await })
    }

    fn handle_notification<'a>(
        &'a self,
        _raw: &'a [u8],
        req: SessionUpdateRequest,
    ) -> HandlerFuture<'a> {
        self.updates.lock().unwrap().push(req.params.update.kind);
        Box::pin(async { Ok(()) })
    }
}
