//! Protocol message definitions for Termbridge.
//!
//! Every frame on the wire is a JSON text message shaped
//! `{"event": "<name>", "data": {...}}`. Clients send [`ClientRequest`]s and
//! the daemon answers with [`ServerEvent`]s; terminal output is pushed as
//! `terminal_output` events without a matching request.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Terminal width used when a resize request omits `cols`.
pub const DEFAULT_COLS: u16 = 80;

/// Terminal height used when a resize request omits `rows`.
pub const DEFAULT_ROWS: u16 = 24;

/// Largest accepted terminal dimension, in cells.
pub const MAX_DIMENSION: u16 = 1000;

// ============================================================================
// Client requests
// ============================================================================

/// Requests a browser client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Open a new shell session.
    CreateTerminal(CreateTerminal),
    /// Keystrokes for a session.
    TerminalInput(TerminalInput),
    /// Window size change for a session.
    TerminalResize(TerminalResize),
    /// Close a session.
    CloseTerminal(CloseTerminal),
}

/// Request to open a new shell session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTerminal {
    /// Client-chosen session id; generated by the daemon when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Directory to start the shell in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl CreateTerminal {
    /// Returns the requested session id, treating blank strings as absent.
    pub fn requested_id(&self) -> Option<&str> {
        non_blank(self.session_id.as_deref())
    }

    /// Returns the requested working directory, treating blank strings as absent.
    pub fn requested_dir(&self) -> Option<&str> {
        non_blank(self.working_dir.as_deref())
    }
}

/// Input bytes for a session, as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInput {
    /// Target session.
    #[serde(default)]
    pub session_id: String,
    /// Text to write to the terminal.
    #[serde(default)]
    pub data: String,
}

/// Window size change for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResize {
    /// Target session.
    #[serde(default)]
    pub session_id: String,
    /// New width in columns.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// New height in rows.
    #[serde(default = "default_rows")]
    pub rows: u16,
}

/// Request to close a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTerminal {
    /// Session to close.
    #[serde(default)]
    pub session_id: String,
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ClientRequest {
    /// Parses a request from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the request to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the event name of this request.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientRequest::CreateTerminal(_) => "create_terminal",
            ClientRequest::TerminalInput(_) => "terminal_input",
            ClientRequest::TerminalResize(_) => "terminal_resize",
            ClientRequest::CloseTerminal(_) => "close_terminal",
        }
    }

    /// Returns the session this request targets, if it names one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClientRequest::CreateTerminal(req) => req.requested_id(),
            ClientRequest::TerminalInput(req) => Some(&req.session_id),
            ClientRequest::TerminalResize(req) => Some(&req.session_id),
            ClientRequest::CloseTerminal(req) => Some(&req.session_id),
        }
    }

    /// Checks required fields and value ranges.
    ///
    /// A request that fails validation must not reach the session core.
    pub fn validate(&self) -> Result<()> {
        match self {
            ClientRequest::CreateTerminal(_) => Ok(()),
            ClientRequest::TerminalInput(req) => require_session_id(&req.session_id),
            ClientRequest::CloseTerminal(req) => require_session_id(&req.session_id),
            ClientRequest::TerminalResize(req) => {
                require_session_id(&req.session_id)?;
                check_dimension("cols", req.cols)?;
                check_dimension("rows", req.rows)
            }
        }
    }
}

fn require_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(ProtocolError::InvalidRequest(
            "session_id required".to_string(),
        ));
    }
    Ok(())
}

fn check_dimension(name: &str, value: u16) -> Result<()> {
    if value == 0 || value > MAX_DIMENSION {
        return Err(ProtocolError::InvalidRequest(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_DIMENSION, value
        )));
    }
    Ok(())
}

// ============================================================================
// Server events
// ============================================================================

/// Events the daemon sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting sent once a connection is accepted.
    ConnectionResponse(ConnectionResponse),
    /// A session was opened.
    TerminalCreated(TerminalCreated),
    /// Output read from a session's terminal.
    TerminalOutput(TerminalOutput),
    /// A session's window size was changed.
    TerminalResized(TerminalResized),
    /// A session was closed, by request or because its shell exited.
    TerminalClosed(TerminalClosed),
    /// A request failed.
    TerminalError(TerminalError),
}

/// Greeting carrying the id the daemon assigned to this connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResponse {
    /// Always `"connected"`.
    pub status: String,
    /// Client id assigned by the daemon.
    pub sid: String,
}

/// Confirmation that a session was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalCreated {
    /// Id of the new session.
    pub session_id: String,
    /// Always `"success"`.
    pub status: String,
}

/// A chunk of terminal output, decoded as UTF-8 with lossy substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutput {
    /// Session the output belongs to.
    pub session_id: String,
    /// Output text.
    pub data: String,
}

/// Confirmation of a window size change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResized {
    /// Resized session.
    pub session_id: String,
    /// New width in columns.
    pub cols: u16,
    /// New height in rows.
    pub rows: u16,
}

/// Notification that a session is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalClosed {
    /// Closed session.
    pub session_id: String,
    /// Why the session closed, when it was not closed by request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalError {
    /// Human-readable error message.
    pub error: String,
    /// Session the failure relates to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ServerEvent {
    /// Builds the connection greeting.
    pub fn connected(client_id: impl Into<String>) -> Self {
        ServerEvent::ConnectionResponse(ConnectionResponse {
            status: "connected".to_string(),
            sid: client_id.into(),
        })
    }

    /// Builds a `terminal_created` event.
    pub fn created(session_id: impl Into<String>) -> Self {
        ServerEvent::TerminalCreated(TerminalCreated {
            session_id: session_id.into(),
            status: "success".to_string(),
        })
    }

    /// Builds a `terminal_output` event.
    pub fn output(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        ServerEvent::TerminalOutput(TerminalOutput {
            session_id: session_id.into(),
            data: data.into(),
        })
    }

    /// Builds a `terminal_resized` event.
    pub fn resized(session_id: impl Into<String>, cols: u16, rows: u16) -> Self {
        ServerEvent::TerminalResized(TerminalResized {
            session_id: session_id.into(),
            cols,
            rows,
        })
    }

    /// Builds a `terminal_closed` event.
    pub fn closed(session_id: impl Into<String>, reason: Option<String>) -> Self {
        ServerEvent::TerminalClosed(TerminalClosed {
            session_id: session_id.into(),
            reason,
        })
    }

    /// Builds a `terminal_error` event.
    pub fn error(error: impl Into<String>, session_id: Option<String>) -> Self {
        ServerEvent::TerminalError(TerminalError {
            error: error.into(),
            session_id,
        })
    }

    /// Returns the event name used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionResponse(_) => "connection_response",
            ServerEvent::TerminalCreated(_) => "terminal_created",
            ServerEvent::TerminalOutput(_) => "terminal_output",
            ServerEvent::TerminalResized(_) => "terminal_resized",
            ServerEvent::TerminalClosed(_) => "terminal_closed",
            ServerEvent::TerminalError(_) => "terminal_error",
        }
    }

    /// Returns the session this event is scoped to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerEvent::ConnectionResponse(_) => None,
            ServerEvent::TerminalCreated(e) => Some(&e.session_id),
            ServerEvent::TerminalOutput(e) => Some(&e.session_id),
            ServerEvent::TerminalResized(e) => Some(&e.session_id),
            ServerEvent::TerminalClosed(e) => Some(&e.session_id),
            ServerEvent::TerminalError(e) => e.session_id.as_deref(),
        }
    }

    /// Returns true for terminal output. Every other event is a control
    /// event that a client must receive.
    pub fn is_output(&self) -> bool {
        matches!(self, ServerEvent::TerminalOutput(_))
    }

    /// Serializes the event to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an event from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
