//! Termbridge Daemon
//!
//! Serves interactive shell sessions to browser IDE clients over WebSocket.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use termbridge_daemon::config::Config;
use termbridge_daemon::orchestrator::{DaemonOrchestrator, OrchestratorEvent};
use termbridge_daemon::session::EnvironmentResolver;
use tracing_subscriber::EnvFilter;

/// Termbridge Daemon - PTY session multiplexer for browser shells.
#[derive(Parser, Debug)]
#[command(name = "termbridged")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the terminal server
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Default working directory for new shells
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },

    /// Show which environment a shell opened in DIR would activate
    ResolveEnv {
        /// Directory to resolve from (defaults to the configured root)
        dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();

    if let Commands::Serve { bind, root } = &cli.command {
        if let Some(bind) = bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(root) = root {
            config.terminal.default_root = root.clone();
        }
    }

    init_tracing(cli.verbose, &config.daemon.log_level);

    if let Some(path) = &cli.config {
        tracing::debug!(path = %path.display(), "Loaded config file");
    }

    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Termbridge daemon starting...");
            let mut orchestrator = DaemonOrchestrator::new(config)?;
            run(&mut orchestrator).await?;
        }
        Commands::ResolveEnv { dir } => {
            let dir = dir.unwrap_or_else(|| config.terminal.default_root.clone());
            let resolver = EnvironmentResolver::new(config.environment.clone());
            match resolver.resolve(&dir) {
                Some(env) => {
                    println!("{}", env.path().display());
                    println!("  name:       {}", env.name());
                    println!("  activation: {}", env.activation_script().display());
                }
                None => {
                    println!("No environment found for {}", dir.display());
                }
            }
        }
        Commands::Config => {
            let toml = config.to_toml().context("Failed to render configuration")?;
            print!("{}", toml);
        }
    }

    Ok(())
}

/// `--verbose` wins, then `TERMBRIDGE_LOG`/`RUST_LOG`, then the config level.
fn init_tracing(verbose: bool, config_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("TERMBRIDGE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(config_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run the daemon until a shutdown signal arrives.
async fn run(orchestrator: &mut DaemonOrchestrator) -> anyhow::Result<()> {
    let mut events = orchestrator.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::debug!(?state, "Orchestrator state");
                }
                OrchestratorEvent::Listening { addr } => {
                    tracing::info!(%addr, "Accepting browser connections");
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    orchestrator.start().await?;

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
