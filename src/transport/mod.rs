//! Transport providers: where an ACP connection's bytes come from.
//!
//! A [`TransportProvider`] supplies one byte input stream and one byte
//! output stream and owns the lifecycle of whatever backs them:
//!
//! - [`ProcessProvider`] spawns the agent executable and binds its stdio.
//! - [`ReplayProvider`] serves the `data` payloads of a recording and
//!   discards everything written to it.
//!
//! Lifecycle: created → [`start`](TransportProvider::start) → streams taken
//! by the connection → [`close`](TransportProvider::close).

pub mod process;
pub mod replay;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::Result;

pub use process::ProcessProvider;
pub use replay::ReplayProvider;

/// Inbound byte stream handed to the connection.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Outbound byte stream handed to the connection.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Capability set of a connection's transport.
///
/// Each stream can be taken exactly once; taking it again is an error.
pub trait TransportProvider: Send {
    /// Acquire OS resources (process handles or file handles).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// resources cannot be acquired. No resources are held afterwards.
    fn start(&mut self) -> Result<()>;

    /// Take the inbound byte stream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// provider is not started or the stream was already taken.
    fn reader(&mut self) -> Result<BoxReader>;

    /// Take the outbound byte stream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// provider is not started or the stream was already taken.
    fn writer(&mut self) -> Result<BoxWriter>;

    /// `true` when outbound traffic is discarded and inbound traffic is canned.
    fn is_replay(&self) -> bool {
        false
    }

    /// Release resources, waiting for process exit where applicable.
    ///
    /// Closing an already closed provider is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// backing process exits unsuccessfully or cannot be reaped.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
