//! WebSocket server.
//!
//! Each accepted connection gets a fresh client id, a queue in the
//! [`ClientHub`], a writer task draining that queue onto the socket and a
//! reader loop feeding text frames to the router. When the connection ends
//! the client's queue is dropped and all of its sessions are closed.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, StreamExt};
use termbridge_protocol::{ProtocolError, ServerEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::{ClientHub, ClientId, OutputSink};
use crate::router::MessageRouter;
use crate::session::SessionRegistry;

/// Accepts browser connections and wires them to the router.
pub struct WsServer {
    listener: TcpListener,
    hub: Arc<ClientHub>,
    router: Arc<MessageRouter<SessionRegistry>>,
    cancel: CancellationToken,
    connections: TaskTracker,
}

impl WsServer {
    /// Binds the listening socket.
    pub async fn bind(
        addr: &str,
        hub: Arc<ClientHub>,
        router: Arc<MessageRouter<SessionRegistry>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket server to {}", addr))?;

        Ok(Self {
            listener,
            hub,
            router,
            cancel,
            connections: TaskTracker::new(),
        })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accepts connections until the cancellation token fires, then waits
    /// for every open connection to wind down.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, "WebSocket server listening");
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.connections.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.hub),
                            Arc::clone(&self.router),
                            self.cancel.clone(),
                        ));
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
                },
            }
        }

        self.connections.close();
        self.connections.wait().await;
        tracing::info!("WebSocket server stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<ClientHub>,
    router: Arc<MessageRouter<SessionRegistry>>,
    cancel: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let client_id: ClientId = Uuid::new_v4().to_string();
    let mut events = hub.register(client_id.clone());
    hub.deliver(&client_id, ServerEvent::connected(client_id.clone()));
    tracing::info!(client_id = %client_id, %peer, "Client connected");

    let (mut ws_sink, mut ws_stream) = ws.split();

    let writer_client = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match send_event(&mut ws_sink, &event).await {
                Ok(()) => {}
                Err(e @ ProtocolError::ConnectionClosed(_)) => {
                    tracing::debug!(client_id = %writer_client, error = %e, "Failed to send event");
                    break;
                }
                Err(e) => {
                    tracing::error!(client_id = %writer_client, error = %e, "Failed to encode event");
                }
            }
        }
        let _ = ws_sink.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                if let Some(reply) = router.route(&client_id, &text).await {
                    hub.deliver(&client_id, reply);
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(WsMessage::Binary(_))) => {
                tracing::debug!(client_id = %client_id, "Ignoring binary frame");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(client_id = %client_id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    // Dropping the hub's sender ends the writer once the queue is flushed.
    if let Some(stats) = hub.unregister(&client_id) {
        tracing::debug!(
            client_id = %client_id,
            sent = stats.messages_sent,
            dropped = stats.messages_dropped,
            "Client queue closed"
        );
    }
    router.client_disconnected(&client_id).await;
    let _ = writer.await;
}

/// Encodes one event and writes it as a text frame.
async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), ProtocolError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let json = event.to_json()?;
    sink.send(WsMessage::Text(json))
        .await
        .map_err(|e| ProtocolError::ConnectionClosed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentConfig, TerminalConfig};
    use crate::session::EnvironmentResolver;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    async fn start_server() -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        let hub = Arc::new(ClientHub::new(64));
        let registry = Arc::new(SessionRegistry::new(
            TerminalConfig {
                shell: "/bin/sh".to_string(),
                default_root: std::env::temp_dir(),
                ..TerminalConfig::default()
            },
            EnvironmentResolver::new(EnvironmentConfig {
                enabled: false,
                ..EnvironmentConfig::default()
            }),
            hub.clone(),
        ));
        let router = Arc::new(MessageRouter::new(registry));
        let cancel = CancellationToken::new();

        let server = WsServer::bind("127.0.0.1:0", hub, router, cancel.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());
        (addr, cancel, handle)
    }

    async fn next_event<S>(stream: &mut S) -> ServerEvent
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("event within 5s")
                .expect("stream open")
                .expect("valid frame");
            if let WsMessage::Text(text) = msg {
                return ServerEvent::from_json(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_connection_greeting_and_error_reply() {
        let (addr, cancel, handle) = start_server().await;

        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        match next_event(&mut rx).await {
            ServerEvent::ConnectionResponse(resp) => {
                assert_eq!(resp.status, "connected");
                assert!(!resp.sid.is_empty());
            }
            other => panic!("unexpected first event: {:?}", other),
        }

        tx.send(WsMessage::Text("garbage".to_string())).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::TerminalError(_)
        ));

        cancel.cancel();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_event_reports_closed_peer() {
        let mut closed = Box::pin(futures_util::sink::unfold((), |_, _msg: WsMessage| async {
            Err::<(), WsError>(WsError::ConnectionClosed)
        }));

        let err = send_event(&mut closed, &ServerEvent::created("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_bind_failure_has_context() {
        let hub = Arc::new(ClientHub::default());
        let registry = Arc::new(SessionRegistry::new(
            TerminalConfig::default(),
            EnvironmentResolver::new(EnvironmentConfig::default()),
            hub.clone(),
        ));
        let router = Arc::new(MessageRouter::new(registry));

        let err = WsServer::bind("256.0.0.1:1", hub, router, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to bind"));
    }
}
