//! # Termbridge Protocol Library
//!
//! This crate defines the messages exchanged between browser clients and the
//! Termbridge daemon over a persistent WebSocket connection.
//!
//! ## Overview
//!
//! - **Client requests**: `create_terminal`, `terminal_input`,
//!   `terminal_resize`, `close_terminal`
//! - **Server events**: `connection_response`, `terminal_created`,
//!   `terminal_output`, `terminal_resized`, `terminal_closed`,
//!   `terminal_error`
//! - **Validation**: required fields and value ranges are checked at the
//!   boundary so malformed requests never reach the session core
//!
//! ## Example Usage
//!
//! ```rust
//! use termbridge_protocol::{ClientRequest, ServerEvent};
//!
//! let request = ClientRequest::from_json(
//!     r#"{"event":"terminal_input","data":{"session_id":"t1","data":"ls\n"}}"#,
//! )
//! .unwrap();
//! request.validate().unwrap();
//!
//! let reply = ServerEvent::output("t1", "README.md\r\n");
//! let frame = reply.to_json().unwrap();
//! assert!(frame.contains("terminal_output"));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request and event definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ClientRequest, CloseTerminal, ConnectionResponse, CreateTerminal, ServerEvent,
    TerminalClosed, TerminalCreated, TerminalError, TerminalInput, TerminalOutput,
    TerminalResize, TerminalResized, DEFAULT_COLS, DEFAULT_ROWS, MAX_DIMENSION,
};
