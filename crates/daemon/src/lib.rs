//! # Termbridge Daemon Library
//!
//! Multiplexes interactive shell sessions for browser IDE clients.
//!
//! ## Overview
//!
//! - **Terminal sessions**: one PTY and one shell per session, with a read
//!   loop that streams output to the owning client and a graceful-then-forced
//!   teardown path
//! - **Session registry**: race-free id bookkeeping, per-client cleanup on
//!   disconnect and reaping of shells that exit on their own
//! - **Environment resolution**: finds a Python virtual environment near the
//!   working directory and activates it in the new shell
//! - **Transport**: WebSocket server with bounded per-client output queues
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 Daemon Orchestrator                    │
//! ├────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────┐  │
//! │  │  WsServer   │──▶│ MessageRouter│──▶│  Session    │  │
//! │  └─────────────┘   └──────────────┘   │  Registry   │  │
//! │         ▲                             └──────┬──────┘  │
//! │  ┌──────┴──────┐        OutputSink           │         │
//! │  │  ClientHub  │◀────────────────── TerminalSession(s) │
//! │  └─────────────┘                                       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use termbridge_daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY sessions, the registry and environment resolution
//! - [`router`]: Request dispatch to the registry
//! - [`transport`]: WebSocket server and client output queues
//! - [`orchestrator`]: Main daemon coordinator

pub mod config;
pub mod orchestrator;
pub mod router;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use termbridge_protocol as protocol;

pub use config::Config;

pub use session::{
    Environment, EnvironmentResolver, SessionError, SessionId, SessionInfo, SessionManager,
    SessionRegistry, SessionState, TerminalSession,
};

pub use router::{MessageRouter, RouterError, RouterResult};

pub use transport::{ClientHub, ClientId, OutputSink, WsServer};

pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
