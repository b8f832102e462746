//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::acp::codec::MAX_LINE_BYTES;
use crate::{AppError, Result};

fn default_agent_command() -> String {
    "claude-code-acp".into()
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

/// Global configuration parsed from an optional `config.toml`.
///
/// Every key has a default, so an empty document (or no file at all) yields
/// a usable configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent executable spawned for live sessions.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    /// Arguments passed to the agent executable.
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Working directory of the agent and the `cwd` sent in the handshake.
    ///
    /// `None` means the current directory of this process.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Maximum wait for the handshake reply; `0` disables the timeout.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    /// Time the agent gets to exit after its stdin closes before it is killed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Maximum accepted length of a single inbound NDJSON line.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent_command: default_agent_command(),
            agent_args: Vec::new(),
            workspace_root: None,
            handshake_timeout_seconds: default_handshake_timeout(),
            shutdown_grace_seconds: default_shutdown_grace(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake timeout, or `None` when waiting is unbounded.
    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.handshake_timeout_seconds))
    }

    /// Grace period between closing the agent's stdin and killing it.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Validate field values and canonicalize `workspace_root`.
    ///
    /// Called by [`GlobalConfig::from_toml_str`]; call it again after
    /// applying command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&mut self) -> Result<()> {
        if self.agent_command.trim().is_empty() {
            return Err(AppError::Config("agent_command must not be empty".into()));
        }

        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        if let Some(root) = &self.workspace_root {
            let canonical = root
                .canonicalize()
                .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
            self.workspace_root = Some(canonical);
        }

        Ok(())
    }
}

/// Where the connection's inbound traffic comes from and whether it is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Talk to a live agent process.
    #[default]
    Live,
    /// Talk to a live agent process and record every inbound message.
    Record(PathBuf),
    /// Replay a previous recording; outbound traffic is discarded.
    Replay(PathBuf),
}

impl ConnectionMode {
    /// Build the mode from the `--record` / `--replay` flags.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when both flags are supplied.
    pub fn from_flags(record: Option<PathBuf>, replay: Option<PathBuf>) -> Result<Self> {
        match (record, replay) {
            (Some(_), Some(_)) => Err(AppError::Config(
                "--record and --replay cannot be combined".into(),
            )),
            (Some(path), None) => Ok(Self::Record(path)),
            (None, Some(path)) => Ok(Self::Replay(path)),
            (None, None) => Ok(Self::Live),
        }
    }

    /// `true` when inbound messages are written to a recording.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// `true` when inbound messages come from a recording.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        matches!(self, Self::Replay(_))
    }

    /// `true` when neither recording nor replaying.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}
