//! Daemon orchestrator for wiring together all components.
//!
//! The `DaemonOrchestrator` builds the client hub, the session registry,
//! the message router and the WebSocket server from a [`Config`], and owns
//! their startup and shutdown order.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::router::MessageRouter;
use crate::session::{EnvironmentResolver, SessionManager, SessionRegistry};
use crate::transport::{ClientHub, WsServer};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The WebSocket server is accepting connections.
    Listening { addr: SocketAddr },
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    config: Config,
    state: Arc<RwLock<OrchestratorState>>,
    hub: Arc<ClientHub>,
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter<SessionRegistry>>,
    server_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let hub = Arc::new(ClientHub::new(config.server.client_buffer));
        let resolver = EnvironmentResolver::new(config.environment.clone());
        let registry = Arc::new(SessionRegistry::new(
            config.terminal.clone(),
            resolver,
            hub.clone(),
        ));
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));

        info!(
            root = %config.terminal.default_root.display(),
            shell = %config.terminal.shell,
            "Terminal defaults"
        );

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            hub,
            registry,
            router,
            server_task: None,
            local_addr: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the session reaper and the WebSocket server.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        self.registry.start_reaper();
        debug!("Started session reaper");

        let server = match WsServer::bind(
            &self.config.server.bind_address,
            Arc::clone(&self.hub),
            Arc::clone(&self.router),
            self.shutdown_token.child_token(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let addr = server.local_addr()?;
        self.local_addr = Some(addr);
        self.server_task = Some(tokio::spawn(server.run()));
        self.emit_event(OrchestratorEvent::Listening { addr });

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!(%addr, "Daemon orchestrator started successfully");
        Ok(())
    }

    /// Stops the server and closes every session.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!(
            sessions = self.registry.count(),
            clients = self.hub.client_count(),
            "Stopping daemon orchestrator..."
        );

        self.shutdown_token.cancel();

        if let Some(task) = self.server_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "WebSocket server task failed");
            }
        }

        self.registry.shutdown().await;
        self.local_addr = None;

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the address the server is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the client hub.
    pub fn hub(&self) -> &Arc<ClientHub> {
        &self.hub
    }

    /// Returns the message router.
    pub fn router(&self) -> &Arc<MessageRouter<SessionRegistry>> {
        &self.router
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
