//! Live agent process transport.
//!
//! Spawns the agent executable with:
//! - stdin bound to the connection's writer and stdout to its reader.
//! - stderr piped and forwarded line by line to `tracing` at `DEBUG`
//!   under the `agent_stderr` target.
//! - `kill_on_drop(true)` so a dropped provider never leaks the child.
//!
//! [`close`](TransportProvider::close) drops any pipe ends still held here,
//! gives the child [`ProcessProvider::with_shutdown_grace`] to exit on its
//! own, then kills it.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{BoxReader, BoxWriter, TransportProvider};
use crate::{AppError, Result};

/// Default time the agent gets to exit after its stdin closes.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Transport backed by a spawned agent process.
#[derive(Debug)]
pub struct ProcessProvider {
    command: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    shutdown_grace: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl ProcessProvider {
    /// Describe the process to spawn; nothing is launched until `start`.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            current_dir: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            child: None,
            stdin: None,
            stdout: None,
        }
    }

    /// Start the process in `dir` instead of the current directory.
    #[must_use]
    pub fn with_current_dir(mut self, dir: PathBuf) -> Self {
        self.current_dir = Some(dir);
        self
    }

    /// Override how long `close` waits before killing the process.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Executable this provider launches.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id of the running child, if any.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    async fn shutdown(&mut self) -> Result<()> {
        // Closing stdin is the agent's signal to finish.
        self.stdin.take();
        self.stdout.take();

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let waited = tokio::time::timeout(self.shutdown_grace, child.wait()).await;
        let status = match waited {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    command = self.command.as_str(),
                    grace = ?self.shutdown_grace,
                    "process transport: agent did not exit in time, killing"
                );
                child
                    .kill()
                    .await
                    .map_err(|err| AppError::Transport(format!("failed to kill agent: {err}")))?;
                child.wait().await
            }
        }
        .map_err(|err| AppError::Transport(format!("failed to wait for agent: {err}")))?;

        if status.success() {
            info!(command = self.command.as_str(), "process transport: agent exited");
            Ok(())
        } else {
            Err(AppError::Transport(format!("agent exited with {status}")))
        }
    }
}

impl TransportProvider for ProcessProvider {
    fn start(&mut self) -> Result<()> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Transport(format!("failed to spawn agent '{}': {err}", self.command))
        })?;

        // On any early return below `child` is dropped and killed.
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture agent stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "agent_stderr", command = command.as_str(), "{line}");
                }
            });
        }

        info!(
            command = self.command.as_str(),
            pid = child.id(),
            "process transport: agent spawned"
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        Ok(())
    }

    fn reader(&mut self) -> Result<BoxReader> {
        self.stdout
            .take()
            .map(|s| Box::new(s) as BoxReader)
            .ok_or_else(|| AppError::Transport("agent stdout is not available".into()))
    }

    fn writer(&mut self) -> Result<BoxWriter> {
        self.stdin
            .take()
            .map(|s| Box::new(s) as BoxWriter)
            .ok_or_else(|| AppError::Transport("agent stdin is not available".into()))
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.shutdown())
    }
}
