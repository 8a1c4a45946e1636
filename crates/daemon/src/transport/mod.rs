//! Client-facing transport.
//!
//! The session core only ever needs to say "deliver this event to client X";
//! that contract is the [`OutputSink`] trait. [`ClientHub`] implements it with
//! one queue per connected client, and [`WsServer`] accepts WebSocket
//! connections, registers them with the hub and feeds their frames to the
//! [`MessageRouter`](crate::router::MessageRouter).

pub mod hub;
pub mod server;

use termbridge_protocol::ServerEvent;

pub use hub::{ClientHandle, ClientHub, ClientReceiver, ClientStats};
pub use server::WsServer;

/// Opaque identifier of one client connection.
pub type ClientId = String;

/// Delivers events to a single client.
///
/// Implementations must not block: sessions call this from their read loops.
pub trait OutputSink: Send + Sync {
    /// Delivers `event` to `client` only. Unknown clients are ignored.
    fn deliver(&self, client: &ClientId, event: ServerEvent);
}
