//! Session management module.
//!
//! This module provides PTY-backed shell sessions, runtime environment
//! detection and the registry that owns every live session.

pub mod environment;
pub mod pty;
pub mod registry;

pub use environment::{Environment, EnvironmentResolver};
pub use pty::{
    ExitReason, SessionError, SessionExit, SessionId, SessionOptions, SessionState,
    TerminalSession,
};
pub use registry::{SessionInfo, SessionManager, SessionRegistry};
