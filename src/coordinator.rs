//! Session coordinator.
//!
//! Wires a [`Connection`] for the configured [`ConnectionMode`] to a
//! [`Handler`] and drives it:
//!
//! 1. Opens the transport (live process, recorded process, or replay).
//! 2. Performs the handshake unless replaying.
//! 3. Spawns the receive loop.
//! 4. Runs the interaction driver: one input line → one prompt → wait for
//!    the [`Completion`] before reading the next line.  Replays have no
//!    live peer to prompt, so the driver only drains completions.
//! 5. Closes the connection when input ends, the inbound stream ends, the
//!    receive loop fails, or shutdown is requested.

use std::io::Write as _;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acp::{Completion, Connection, ConnectionOptions, Handler};
use crate::config::{ConnectionMode, GlobalConfig};
use crate::console::{read_line, SharedInput};
use crate::transport::ProcessProvider;
use crate::{AppError, Result};

/// Owns the connection and the handler for one session.
pub struct Coordinator {
    connection: Arc<Connection>,
    handler: Arc<dyn Handler>,
}

impl Coordinator {
    /// Open a connection for `mode` and, unless replaying, initialize the
    /// session.
    ///
    /// # Errors
    ///
    /// Returns the transport, recorder, or handshake error.  A connection
    /// whose handshake fails is closed before returning.
    pub async fn connect(
        config: &GlobalConfig,
        mode: &ConnectionMode,
        handler: Arc<dyn Handler>,
    ) -> Result<Self> {
        let connection = open_connection(config, mode).await?;

        if !connection.is_replay() {
            if let Err(err) = connection.initialize_session().await {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "coordinator: close after failed handshake");
                }
                return Err(err);
            }
        }

        Ok(Self::new(connection, handler))
    }

    /// Coordinate an already opened (and, if live, initialized) connection.
    #[must_use]
    pub fn new(connection: Connection, handler: Arc<dyn Handler>) -> Self {
        Self {
            connection: Arc::new(connection),
            handler,
        }
    }

    /// Shared handle to the connection, e.g. for an external shutdown path.
    #[must_use]
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    /// Run the session until it ends, then close the connection.
    ///
    /// # Errors
    ///
    /// Returns the receive loop's error, a send or input error from the
    /// interaction driver, or otherwise the connection's close error.
    pub async fn run(self, input: SharedInput, shutdown: CancellationToken) -> Result<()> {
        // Capacity 1 is the smallest tokio allows. An unsolicited response that
        // arrives while no prompt is in flight stays buffered and completes
        // the next prompt early; the wire format gives no way to tell them apart.
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(1);

        let conn = Arc::clone(&self.connection);
        let handler = Arc::clone(&self.handler);
        let mut receive =
            tokio::spawn(async move { conn.stream_responses(handler.as_ref(), done_tx).await });

        let outcome = tokio::select! {
            () = shutdown.cancelled() => {
                info!("coordinator: shutdown requested");
                Ok(())
            }
            joined = &mut receive => receive_outcome(joined),
            result = drive(&self.connection, &input, &mut done_rx) => result,
        };

        let closed = self.connection.close().await;
        receive.abort();

        match (outcome, closed) {
            (Err(err), Err(close_err)) => {
                warn!(error = %close_err, "coordinator: close failed after session error");
                Err(err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

/// Open the connection described by `mode`.
///
/// # Errors
///
/// Returns the transport or recorder error.
pub async fn open_connection(config: &GlobalConfig, mode: &ConnectionMode) -> Result<Connection> {
    let options = ConnectionOptions::from(config);

    match mode {
        ConnectionMode::Replay(path) => {
            info!(path = %path.display(), "coordinator: replaying conversation");
            Connection::open_replay(path).await
        }
        ConnectionMode::Record(path) => {
            info!(path = %path.display(), "coordinator: recording conversation");
            Connection::open_with(Box::new(process_provider(config)), options)?
                .attach_recording(path)
                .await
        }
        ConnectionMode::Live => Connection::open_with(Box::new(process_provider(config)), options),
    }
}

fn process_provider(config: &GlobalConfig) -> ProcessProvider {
    let provider = ProcessProvider::new(config.agent_command.as_str(), config.agent_args.clone())
        .with_shutdown_grace(config.shutdown_grace());
    match &config.workspace_root {
        Some(root) => provider.with_current_dir(root.clone()),
        None => provider,
    }
}

fn receive_outcome(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => {
            info!("coordinator: inbound stream finished");
            Ok(())
        }
        Ok(Err(err)) => {
            error!(error = %err, "coordinator: receive loop failed");
            Err(err)
        }
        Err(err) => Err(AppError::Acp(format!("receive loop aborted: {err}"))),
    }
}

async fn drive(
    connection: &Connection,
    input: &SharedInput,
    done_rx: &mut mpsc::Receiver<Completion>,
) -> Result<()> {
    if connection.is_replay() {
        while let Some(completion) = done_rx.recv().await {
            report(&completion);
        }
        // The receive loop has ended; let its outcome decide.
        std::future::pending::<()>().await;
    }

    loop {
        prompt_marker();
        let Some(line) = read_line(input).await? else {
            info!("coordinator: input closed");
            return Ok(());
        };

        if line.trim().is_empty() {
            continue;
        }

        connection.send_message(&line).await?;

        let Some(completion) = done_rx.recv().await else {
            // The receive loop has ended; let its outcome decide.
            std::future::pending::<()>().await;
            return Ok(());
        };
        report(&completion);
    }
}

fn prompt_marker() {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\n> ");
    let _ = out.flush();
}

fn report(completion: &Completion) {
    if let Some(err) = &completion.error {
        warn!(code = err.code, message = err.message.as_str(), "agent rejected prompt");
    } else {
        debug!(
            stop_reason = completion.stop_reason.as_deref(),
            "coordinator: prompt completed"
        );
    }
}
