//! Per-client outbound event queues.
//!
//! Every connected client owns one queue, drained in order by its writer
//! task. Only terminal output is bounded: once `capacity` output events are
//! waiting, further output for that client is dropped, counted, and the
//! client is flagged as backpressured until the writer catches up. Control
//! events (acknowledgements, `terminal_closed`, errors) are always queued and
//! keep their place relative to the output around them.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use termbridge_protocol::ServerEvent;
use tokio::sync::mpsc;

use super::{ClientId, OutputSink};

/// Default number of output events a client may have waiting.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Statistics about a client's event delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Events queued successfully.
    pub messages_sent: u64,
    /// Output events dropped because the client's queue was full.
    pub messages_dropped: u64,
    /// Whether the client is currently experiencing backpressure.
    pub is_backpressured: bool,
}

/// A connected client's outbound queue.
pub struct ClientHandle {
    id: ClientId,
    tx: mpsc::UnboundedSender<ServerEvent>,
    pending_output: Arc<AtomicUsize>,
    capacity: usize,
    sent: AtomicU64,
    dropped: AtomicU64,
    backpressured: AtomicBool,
}

/// Receiving end of a client queue, owned by the connection's writer task.
pub struct ClientReceiver {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    pending_output: Arc<AtomicUsize>,
}

impl ClientReceiver {
    /// Waits for the next event. Returns `None` once the client is
    /// unregistered and the queue is empty.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        let event = self.rx.recv().await?;
        self.release(&event);
        Some(event)
    }

    /// Takes the next event if one is waiting.
    pub fn try_recv(&mut self) -> Result<ServerEvent, mpsc::error::TryRecvError> {
        let event = self.rx.try_recv()?;
        self.release(&event);
        Ok(event)
    }

    fn release(&self, event: &ServerEvent) {
        if event.is_output() {
            self.pending_output.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl ClientHandle {
    /// Creates a handle and the receiver its writer task drains.
    pub fn with_capacity(id: ClientId, capacity: usize) -> (Self, ClientReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending_output = Arc::new(AtomicUsize::new(0));
        let handle = ClientHandle {
            id,
            tx,
            pending_output: Arc::clone(&pending_output),
            capacity: capacity.max(1),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            backpressured: AtomicBool::new(false),
        };
        (handle, ClientReceiver { rx, pending_output })
    }

    /// Returns the client ID.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Returns a snapshot of the delivery statistics.
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
            is_backpressured: self.backpressured.load(Ordering::Relaxed),
        }
    }

    /// Queues an event without blocking.
    ///
    /// Returns true if the event was queued. Only output can be dropped for
    /// lack of room; any event is lost once the receiver is gone.
    fn send(&self, event: ServerEvent) -> bool {
        let output = event.is_output();
        if output && !self.reserve_output_slot() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if !self.backpressured.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    client_id = %self.id,
                    dropped,
                    "Client is backpressured, dropping output"
                );
            }
            return false;
        }

        match self.tx.send(event) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                if output && self.backpressured.swap(false, Ordering::Relaxed) {
                    tracing::debug!(client_id = %self.id, "Client recovered from backpressure");
                }
                true
            }
            Err(_) => {
                if output {
                    self.pending_output.fetch_sub(1, Ordering::AcqRel);
                }
                tracing::debug!(client_id = %self.id, "Client channel closed");
                false
            }
        }
    }

    fn reserve_output_slot(&self) -> bool {
        self.pending_output
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.capacity).then_some(pending + 1)
            })
            .is_ok()
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Routes events to connected clients by id.
pub struct ClientHub {
    clients: DashMap<ClientId, ClientHandle>,
    capacity: usize,
}

impl ClientHub {
    /// Creates a hub whose clients may each have `capacity` output events
    /// waiting.
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            capacity,
        }
    }

    /// Registers a client and returns the receiver for its events.
    ///
    /// Registering an id that is already present replaces the old queue.
    pub fn register(&self, client_id: ClientId) -> ClientReceiver {
        let (handle, rx) = ClientHandle::with_capacity(client_id.clone(), self.capacity);
        self.clients.insert(client_id.clone(), handle);
        tracing::debug!(client_id = %client_id, "Registered client");
        rx
    }

    /// Removes a client, returning its final statistics if it was present.
    pub fn unregister(&self, client_id: &ClientId) -> Option<ClientStats> {
        self.clients.remove(client_id).map(|(_, handle)| handle.stats())
    }

    /// Returns the number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Returns whether a client is registered.
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Returns statistics for a specific client.
    pub fn client_stats(&self, client_id: &ClientId) -> Option<ClientStats> {
        self.clients.get(client_id).map(|handle| handle.stats())
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl OutputSink for ClientHub {
    fn deliver(&self, client: &ClientId, event: ServerEvent) {
        let closed = match self.clients.get(client) {
            Some(handle) => {
                if handle.is_closed() {
                    true
                } else {
                    handle.send(event);
                    false
                }
            }
            None => {
                tracing::trace!(client_id = %client, "Dropping event for unknown client");
                false
            }
        };

        // The shard guard from `get` must be released before removing.
        if closed {
            self.clients.remove(client);
            tracing::debug!(client_id = %client, "Removed disconnected client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(n: usize) -> ServerEvent {
        ServerEvent::output("t1", format!("chunk-{}", n))
    }

    #[test]
    fn test_client_handle_creation() {
        let (handle, _rx) = ClientHandle::with_capacity("client-1".to_string(), 4);
        assert_eq!(handle.id(), "client-1");
        assert_eq!(handle.stats(), ClientStats::default());
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let hub = ClientHub::new(8);
        let _rx = hub.register("a".to_string());
        assert_eq!(hub.client_count(), 1);
        assert!(hub.contains(&"a".to_string()));

        let stats = hub.unregister(&"a".to_string());
        assert!(stats.is_some());
        assert_eq!(hub.client_count(), 0);
        assert!(hub.unregister(&"a".to_string()).is_none());
    }

    #[tokio::test]
    async fn test_deliver_only_to_target_client() {
        let hub = ClientHub::new(8);
        let mut rx_a = hub.register("a".to_string());
        let mut rx_b = hub.register("b".to_string());

        hub.deliver(&"a".to_string(), output(1));

        assert_eq!(rx_a.recv().await, Some(output(1)));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_preserves_order() {
        let hub = ClientHub::new(64);
        let mut rx = hub.register("a".to_string());

        for i in 0..20 {
            hub.deliver(&"a".to_string(), output(i));
        }
        for i in 0..20 {
            assert_eq!(rx.recv().await, Some(output(i)));
        }
    }

    #[tokio::test]
    async fn test_slow_client_drops_and_recovers() {
        let hub = ClientHub::new(2);
        let mut rx = hub.register("slow".to_string());
        let id = "slow".to_string();

        for i in 0..5 {
            hub.deliver(&id, output(i));
        }

        let stats = hub.client_stats(&id).unwrap();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_dropped, 3);
        assert!(stats.is_backpressured);

        // Draining the queue lets the next delivery through.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        hub.deliver(&id, output(5));

        let stats = hub.client_stats(&id).unwrap();
        assert_eq!(stats.messages_sent, 3);
        assert!(!stats.is_backpressured);
    }

    #[tokio::test]
    async fn test_control_events_survive_full_queue() {
        let hub = ClientHub::new(2);
        let mut rx = hub.register("busy".to_string());
        let id = "busy".to_string();

        for i in 0..4 {
            hub.deliver(&id, output(i));
        }
        let closed = ServerEvent::closed("t1", Some("exited".to_string()));
        hub.deliver(&id, closed.clone());
        hub.deliver(&id, ServerEvent::created("t2"));

        let stats = hub.client_stats(&id).unwrap();
        assert_eq!(stats.messages_sent, 4);
        assert_eq!(stats.messages_dropped, 2);

        assert_eq!(rx.recv().await, Some(output(0)));
        assert_eq!(rx.recv().await, Some(output(1)));
        assert_eq!(rx.recv().await, Some(closed));
        assert_eq!(rx.recv().await, Some(ServerEvent::created("t2")));
        assert!(rx.try_recv().is_err());

        // Draining frees the output slots again.
        hub.deliver(&id, output(10));
        hub.deliver(&id, output(11));
        assert_eq!(hub.client_stats(&id).unwrap().messages_dropped, 2);
        assert_eq!(rx.try_recv().unwrap(), output(10));
        assert_eq!(rx.try_recv().unwrap(), output(11));
    }

    #[tokio::test]
    async fn test_closed_client_is_pruned() {
        let hub = ClientHub::new(4);
        let rx = hub.register("gone".to_string());
        drop(rx);

        hub.deliver(&"gone".to_string(), output(0));
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn test_deliver_to_unknown_client_is_ignored() {
        let hub = ClientHub::default();
        hub.deliver(&"nobody".to_string(), output(0));
        assert_eq!(hub.client_count(), 0);
    }
}
