//! Session registry.
//!
//! The registry is the only owner of the id → session map. Inserts go
//! through `DashMap::entry` and removals through `DashMap::remove`, so two
//! callers racing to close the same id see exactly one removal. Removal is
//! immediate; terminating the shell runs on a tracked background task so a
//! slow teardown never holds up the caller.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use termbridge_protocol::ServerEvent;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::environment::EnvironmentResolver;
use super::pty::{
    ExitReason, SessionError, SessionExit, SessionId, SessionOptions, SessionState,
    TerminalSession,
};
use crate::config::TerminalConfig;
use crate::transport::{ClientId, OutputSink};

/// Interface the router uses to drive sessions.
///
/// Implementations must be thread-safe and suitable for concurrent access.
#[allow(async_fn_in_trait)]
pub trait SessionManager: Send + Sync {
    /// Starts a shell for `owner` and registers it.
    ///
    /// A missing `requested_id` is replaced by a generated one; a missing or
    /// unusable `working_dir` silently falls back to the default root.
    async fn create_session(
        &self,
        requested_id: Option<&str>,
        working_dir: Option<&str>,
        owner: &ClientId,
    ) -> Result<SessionId, SessionError>;

    /// Forwards input to a session. Returns false only if the id is unknown.
    async fn send_input(&self, session_id: &str, data: &[u8]) -> bool;

    /// Resizes a session. Returns false only if the id is unknown.
    async fn resize_session(&self, session_id: &str, cols: u16, rows: u16) -> bool;

    /// Removes a session and starts stopping it. Returns true only for the
    /// caller that actually removed it.
    async fn close_session(&self, session_id: &str) -> bool;

    /// Closes every session owned by `owner`, returning the closed ids.
    async fn close_client_sessions(&self, owner: &ClientId) -> Vec<SessionId>;

    /// Closes every live session.
    async fn close_all_sessions(&self);

    /// Lists all live sessions.
    fn list(&self) -> Vec<SessionInfo>;

    /// Returns the number of live sessions.
    fn count(&self) -> usize;
}

/// Information about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub owner: ClientId,
    pub working_directory: PathBuf,
    /// Root of the activated environment, if any.
    pub environment: Option<PathBuf>,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub state: SessionState,
}

impl SessionInfo {
    fn from_session(session: &TerminalSession) -> Self {
        let (cols, rows) = session.size();
        Self {
            id: session.id().clone(),
            owner: session.owner().clone(),
            working_directory: session.working_directory().to_path_buf(),
            environment: session.environment().map(|env| env.path().to_path_buf()),
            pid: session.pid(),
            cols,
            rows,
            state: session.state(),
        }
    }
}

/// Thread-safe session registry backed by a `DashMap`.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<TerminalSession>>,
    config: TerminalConfig,
    resolver: EnvironmentResolver,
    sink: Arc<dyn OutputSink>,
    next_seq: AtomicU64,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionExit>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    teardowns: TaskTracker,
    cancel: CancellationToken,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(
        config: TerminalConfig,
        resolver: EnvironmentResolver,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            sessions: DashMap::new(),
            config,
            resolver,
            sink,
            next_seq: AtomicU64::new(0),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
            reaper: Mutex::new(None),
            teardowns: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a live session by id.
    pub fn get_session(&self, session_id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Starts the background task that unregisters sessions whose shell
    /// exited on its own and tells their owner with `terminal_closed`.
    pub fn start_reaper(self: &Arc<Self>) {
        let Some(mut exits) = self.exit_rx.try_lock().ok().and_then(|mut rx| rx.take()) else {
            tracing::warn!("Session reaper already started");
            return;
        };

        let registry: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let exit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    exit = exits.recv() => match exit {
                        Some(exit) => exit,
                        None => break,
                    },
                };
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.reap(exit);
            }
            tracing::debug!("Session reaper stopped");
        });

        match self.reaper.try_lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(_) => handle.abort(),
        }
    }

    /// Unregisters a session that ended on its own.
    ///
    /// The entry is only removed if it still belongs to the session that
    /// exited; a newer session reusing the id is left alone.
    pub fn reap(&self, exit: SessionExit) {
        let removed = self
            .sessions
            .remove_if(&exit.session_id, |_, session| {
                session.instance() == exit.instance
            })
            .is_some();

        if !removed {
            tracing::debug!(session_id = %exit.session_id, "Exited session already removed");
            return;
        }

        tracing::info!(
            session_id = %exit.session_id,
            client_id = %exit.owner,
            reason = exit.reason.as_str(),
            "Session ended on its own"
        );
        self.sink.deliver(
            &exit.owner,
            ServerEvent::closed(exit.session_id, Some(exit.reason.as_str().to_string())),
        );
    }

    /// Stops the reaper, closes every session and waits for all pending
    /// teardowns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.close_all_sessions().await;
        self.teardowns.close();
        self.teardowns.wait().await;
        if let Some(handle) = self.reaper.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Removes a session and waits until its shell is gone.
    async fn remove_and_stop(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };
        session.stop().await;
        tracing::info!(session_id = %session_id, "Closed session");
        true
    }

    fn generate_id(&self) -> (SessionId, u64) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        loop {
            let seq = self.next_instance();
            let id = format!("term_{}_{}", seq, secs);
            if !self.sessions.contains_key(&id) {
                return (id, seq);
            }
        }
    }

    fn next_instance(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Picks the directory a new shell starts in.
    ///
    /// Relative paths are taken relative to the default root. Blank, `/`,
    /// missing and non-directory paths fall back to the default root.
    pub fn resolve_working_dir(&self, requested: Option<&str>) -> PathBuf {
        let root = self.default_root();
        let Some(requested) = requested.map(str::trim).filter(|d| !d.is_empty() && *d != "/")
        else {
            return root;
        };

        let path = Path::new(requested);
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };

        if candidate.is_dir() {
            candidate
        } else {
            tracing::debug!(
                requested = %requested,
                fallback = %root.display(),
                "Working directory unusable, using default root"
            );
            root
        }
    }

    fn default_root(&self) -> PathBuf {
        if self.config.default_root.is_dir() {
            self.config.default_root.clone()
        } else {
            tracing::warn!(
                root = %self.config.default_root.display(),
                "Default root does not exist, using /"
            );
            PathBuf::from("/")
        }
    }
}

impl SessionManager for SessionRegistry {
    async fn create_session(
        &self,
        requested_id: Option<&str>,
        working_dir: Option<&str>,
        owner: &ClientId,
    ) -> Result<SessionId, SessionError> {
        let (id, instance) = match requested_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                if self.sessions.contains_key(id) {
                    return Err(SessionError::AlreadyExists(id.to_string()));
                }
                (id.to_string(), self.next_instance())
            }
            None => self.generate_id(),
        };

        let working_directory = self.resolve_working_dir(working_dir);
        let environment = self.resolver.resolve(&working_directory);

        let session = TerminalSession::new(
            SessionOptions {
                id: id.clone(),
                instance,
                owner: owner.clone(),
                working_directory,
                environment,
            },
            self.config.clone(),
            Arc::clone(&self.sink),
            self.exit_tx.clone(),
        );
        session.start().await?;

        let inserted = match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
                true
            }
        };
        if !inserted {
            session.stop().await;
            return Err(SessionError::AlreadyExists(id));
        }

        // A shell that died before the insert had its exit notice ignored.
        if !session.is_running() {
            self.reap(SessionExit {
                session_id: id.clone(),
                instance,
                owner: owner.clone(),
                reason: session.exit_reason().unwrap_or(ExitReason::Exited),
            });
            return Ok(id);
        }

        tracing::info!(
            session_id = %id,
            client_id = %owner,
            sessions = self.sessions.len(),
            "Created session"
        );
        Ok(id)
    }

    async fn send_input(&self, session_id: &str, data: &[u8]) -> bool {
        let Some(session) = self.get_session(session_id) else {
            return false;
        };
        if let Err(e) = session.queue_input(data) {
            tracing::warn!(session_id = %session_id, error = %e, "Input not delivered");
        }
        true
    }

    async fn resize_session(&self, session_id: &str, cols: u16, rows: u16) -> bool {
        let Some(session) = self.get_session(session_id) else {
            return false;
        };
        if let Err(e) = session.resize(cols, rows).await {
            tracing::warn!(session_id = %session_id, cols, rows, error = %e, "Resize failed");
        }
        true
    }

    async fn close_session(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            tracing::debug!(session_id = %session_id, "Close requested for unknown session");
            return false;
        };
        if session.begin_stop() {
            self.teardowns.spawn(async move { session.complete_stop().await });
        }
        tracing::info!(session_id = %session_id, "Closed session");
        true
    }

    async fn close_client_sessions(&self, owner: &ClientId) -> Vec<SessionId> {
        let owned: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().owner() == owner)
            .map(|entry| entry.key().clone())
            .collect();

        let closed: Vec<SessionId> = join_all(owned.into_iter().map(|id| async move {
            if self.remove_and_stop(&id).await {
                Some(id)
            } else {
                None
            }
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        if !closed.is_empty() {
            tracing::info!(client_id = %owner, count = closed.len(), "Closed client sessions");
        }
        closed
    }

    async fn close_all_sessions(&self) {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let count = ids.len();

        join_all(ids.iter().map(|id| self.remove_and_stop(id))).await;

        if count > 0 {
            tracing::info!(count, "Closed all sessions");
        }
    }

    fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| SessionInfo::from_session(entry.value()))
            .collect()
    }

    fn count(&self) -> usize {
        self.sessions.len()
    }
}
