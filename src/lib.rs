#![forbid(unsafe_code)]

//! Client for the Agent Client Protocol over newline-delimited JSON.
//!
//! Launches an agent process (or replays a recording of one), performs the
//! `session/new` handshake, sends prompts, and routes inbound notifications
//! and permission requests to a pluggable [`acp::Handler`].  Inbound traffic
//! can be recorded to JSONL and replayed later.

pub mod acp;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod errors;
pub mod recorder;
pub mod transport;

pub use config::{ConnectionMode, GlobalConfig};
pub use errors::{AppError, Result};
