//! Errors raised while decoding, validating or encoding frames.

use serde_json::error::Category;
use thiserror::Error;

/// Protocol error type covering every failure at the wire boundary.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize an outgoing event.
    #[error("cannot encode event: {0}")]
    Serialization(String),

    /// Failed to deserialize an incoming frame.
    #[error("malformed frame: {0}")]
    Deserialization(String),

    /// The frame parsed but carries an invalid or missing field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The peer went away before a reply could be sent.
    #[error("client disconnected: {0}")]
    ConnectionClosed(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Io => ProtocolError::Serialization(err.to_string()),
            Category::Syntax | Category::Data | Category::Eof => {
                ProtocolError::Deserialization(err.to_string())
            }
        }
    }
}
