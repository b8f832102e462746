#![forbid(unsafe_code)]

//! `agent-tether`: interactive ACP client binary.
//!
//! Parses the command line, loads configuration, starts an agent session
//! (live, recorded, or replayed), and relays prompts typed on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_tether::console::{shared_input, ConsoleHandler};
use agent_tether::coordinator::Coordinator;
use agent_tether::{AppError, ConnectionMode, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-tether", about = "ACP agent client with record and replay", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record every inbound message to this JSONL file.
    #[arg(long, conflicts_with = "replay")]
    record: Option<PathBuf>,

    /// Replay a JSONL recording instead of launching the agent.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Override the agent executable.
    #[arg(long)]
    agent: Option<String>,

    /// Override the workspace root (agent cwd and handshake `cwd`).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Arguments passed to the agent executable, after `--`.
    #[arg(last = true)]
    agent_args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(agent) = args.agent {
        config.agent_command = agent;
    }
    if !args.agent_args.is_empty() {
        config.agent_args = args.agent_args;
    }
    if let Some(workspace) = args.workspace {
        config.workspace_root = Some(workspace);
    }
    config.validate()?;

    let mode = ConnectionMode::from_flags(args.record, args.replay)?;
    info!(agent = config.agent_command.as_str(), ?mode, "agent-tether starting");

    let input = shared_input(BufReader::new(tokio::io::stdin()));
    let handler = Arc::new(ConsoleHandler::new(Arc::clone(&input)));

    let coordinator = Coordinator::connect(&config, &mode, handler).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let result = coordinator.run(input, shutdown).await;
    if let Err(err) = &result {
        error!(%err, "session ended with error");
    }
    info!("agent-tether shut down");

    // Stdin may still be blocked in a reader thread; do not wait for it.
    std::process::exit(i32::from(result.is_err()));
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
