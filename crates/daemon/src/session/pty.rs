//! PTY-backed terminal sessions.
//!
//! A [`TerminalSession`] owns one pseudo-terminal and the shell attached to
//! it. Its read loop waits for output with a bounded timeout, yields to the
//! runtime whenever nothing is ready, and forwards every chunk to the owning
//! client through an [`OutputSink`]. Input is queued and applied by a
//! separate writer task. When the shell exits on its own the read loop tears
//! the session down and reports the exit on the registry's channel.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use termbridge_protocol::ServerEvent;
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::environment::Environment;
use crate::config::TerminalConfig;
use crate::transport::{ClientId, OutputSink};

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No live session has this id.
    #[error("invalid session or session not found: {0}")]
    NotFound(SessionId),

    /// A live session already uses the requested id.
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    /// Failed to allocate the PTY or spawn the shell.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// The session has been stopped or was never started.
    #[error("session not running: {0}")]
    NotRunning(SessionId),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Converts the error into a `terminal_error` event.
    pub fn to_event(&self, session_id: Option<String>) -> ServerEvent {
        ServerEvent::error(self.to_string(), session_id)
    }
}

/// Lifecycle state of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            _ => SessionState::Closed,
        }
    }

    /// Returns the lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended without being asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The shell exited or hung up the terminal.
    Exited,
    /// Reading the terminal failed.
    Failed,
}

impl ExitReason {
    /// Returns the reason string carried by `terminal_closed`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Exited => "exited",
            ExitReason::Failed => "error",
        }
    }
}

/// Notice sent to the registry when a session ends on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExit {
    pub session_id: SessionId,
    pub instance: u64,
    pub owner: ClientId,
    pub reason: ExitReason,
}

/// Everything fixed about a session at creation time.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub id: SessionId,
    /// Process-unique sequence number; tells apart sessions reusing an id.
    pub instance: u64,
    pub owner: ClientId,
    pub working_directory: PathBuf,
    pub environment: Option<Environment>,
}

/// Upper bound on a single input write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between exit checks while waiting for a terminated shell.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Maximum chunks read after exit to flush the shell's last output.
const DRAIN_LIMIT: usize = 64;

const PROMPT: &str = r"\[\033[01;32m\]\u@\h\[\033[00m\]:\[\033[01;34m\]\w\[\033[00m\]\$ ";

/// One shell running on its own pseudo-terminal.
pub struct TerminalSession {
    options: SessionOptions,
    config: TerminalConfig,
    sink: Arc<dyn OutputSink>,
    exits: mpsc::UnboundedSender<SessionExit>,
    input: mpsc::UnboundedSender<Vec<u8>>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,

    state: AtomicU8,
    running: AtomicBool,
    torn_down: AtomicBool,
    cols: AtomicU16,
    rows: AtomicU16,
    pid: AtomicU32,
    exit_reason: OnceLock<ExitReason>,

    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    io: RwLock<Option<Arc<AsyncFd<File>>>>,
    write_lock: Mutex<()>,

    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    activation: Mutex<Option<JoinHandle<()>>>,
}

impl TerminalSession {
    /// Creates a session in the `Created` state. Nothing is spawned yet.
    pub fn new(
        options: SessionOptions,
        config: TerminalConfig,
        sink: Arc<dyn OutputSink>,
        exits: mpsc::UnboundedSender<SessionExit>,
    ) -> Arc<Self> {
        let (input, input_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            cols: AtomicU16::new(config.cols),
            rows: AtomicU16::new(config.rows),
            options,
            config,
            sink,
            exits,
            input,
            input_rx: Mutex::new(Some(input_rx)),
            state: AtomicU8::new(SessionState::Created as u8),
            running: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            exit_reason: OnceLock::new(),
            master: Mutex::new(None),
            child: Mutex::new(None),
            io: RwLock::new(None),
            write_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            activation: Mutex::new(None),
        })
    }

    /// Spawns the shell and starts the read loop.
    ///
    /// On failure the session moves straight to `Closed` and holds no
    /// resources.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let started = self.state.compare_exchange(
            SessionState::Created as u8,
            SessionState::Starting as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if started.is_err() {
            return Err(SessionError::SpawnFailed(format!(
                "session {} was already started",
                self.id()
            )));
        }

        let (master, child, io) = match self.spawn_shell() {
            Ok(parts) => parts,
            Err(e) => {
                self.torn_down.store(true, Ordering::SeqCst);
                self.set_state(SessionState::Closed);
                return Err(e);
            }
        };

        let io = Arc::new(io);
        *self.master.lock().await = Some(master);
        *self.child.lock().await = Some(child);
        *self.io.write().await = Some(Arc::clone(&io));

        self.running.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Running);

        let session = Arc::clone(self);
        *self.reader.lock().await = Some(tokio::spawn(session.read_loop(io)));

        if let Some(input) = self.input_rx.lock().await.take() {
            let session = Arc::clone(self);
            *self.writer.lock().await = Some(tokio::spawn(session.write_loop(input)));
        }

        if let Some(env) = self.options.environment.clone() {
            let session = Arc::clone(self);
            let delay = self.config.activation_delay();
            *self.activation.lock().await = Some(tokio::spawn(async move {
                tokio::select! {
                    _ = session.cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => session.activate(&env).await,
                }
            }));
        }

        tracing::info!(
            session_id = %self.id(),
            client_id = %self.owner(),
            pid = ?self.pid(),
            cwd = %self.working_directory().display(),
            environment = ?self.options.environment.as_ref().map(|e| e.name()),
            "Terminal session started"
        );

        Ok(())
    }

    fn spawn_shell(
        &self,
    ) -> Result<
        (
            Box<dyn MasterPty + Send>,
            Box<dyn Child + Send + Sync>,
            AsyncFd<File>,
        ),
        SessionError,
    > {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.config.rows,
                cols: self.config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.config.shell);
        cmd.cwd(self.working_directory());
        for (key, value) in self.shell_environment() {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        // Only the child may hold the subordinate side, so its exit hangs up
        // the master.
        drop(pair.slave);

        if let Some(pid) = child.process_id() {
            self.pid.store(pid, Ordering::SeqCst);
        }

        match nonblocking_master(pair.master.as_ref()) {
            Ok(io) => Ok((pair.master, child, io)),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(SessionError::SpawnFailed(e.to_string()))
            }
        }
    }

    /// Builds the variables added to the shell's inherited environment.
    fn shell_environment(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("TERM".to_string(), self.config.term.clone()),
            ("TERMBRIDGE_SESSION_ID".to_string(), self.id().clone()),
        ];

        match &self.options.environment {
            Some(env) => {
                vars.push((
                    "PS1".to_string(),
                    format!(r"\[\033[01;32m\]({})\[\033[00m\] {}", env.name(), PROMPT),
                ));
                vars.push((
                    "TERMBRIDGE_ENV_PATH".to_string(),
                    env.path().display().to_string(),
                ));
            }
            None => vars.push(("PS1".to_string(), PROMPT.to_string())),
        }

        vars
    }

    async fn activate(&self, env: &Environment) {
        match self.queue_input(env.activation_command().as_bytes()) {
            Ok(()) => tracing::info!(
                session_id = %self.id(),
                environment = %env.name(),
                "Activated environment"
            ),
            Err(e) => tracing::warn!(
                session_id = %self.id(),
                error = %e,
                "Failed to activate environment"
            ),
        }
    }

    async fn read_loop(self: Arc<Self>, io: Arc<AsyncFd<File>>) {
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];
        let poll_interval = self.config.poll_interval();

        let exit = loop {
            let ready = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                ready = tokio::time::timeout(poll_interval, io.readable()) => ready,
            };

            match ready {
                Ok(Ok(mut guard)) => {
                    match guard.try_io(|inner| read_chunk(inner.get_ref(), &mut buf)) {
                        Ok(Ok(0)) => break Some(ExitReason::Exited),
                        Ok(Ok(n)) => self.emit(&buf[..n]),
                        Ok(Err(e)) if is_hangup(&e) => break Some(ExitReason::Exited),
                        Ok(Err(e)) => {
                            tracing::warn!(session_id = %self.id(), error = %e, "PTY read failed");
                            break Some(ExitReason::Failed);
                        }
                        Err(_would_block) => tokio::task::yield_now().await,
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %self.id(), error = %e, "PTY poll failed");
                    break Some(ExitReason::Failed);
                }
                Err(_elapsed) => tokio::task::yield_now().await,
            }

            if self.child_exited().await {
                break Some(ExitReason::Exited);
            }
        };

        let Some(reason) = exit else {
            tracing::trace!(session_id = %self.id(), "Read loop cancelled");
            return;
        };

        if reason == ExitReason::Exited {
            self.drain(io.get_ref(), &mut buf);
        }
        drop(io);

        let _ = self.exit_reason.set(reason);
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(
            session_id = %self.id(),
            reason = reason.as_str(),
            "Shell ended, cleaning up session"
        );

        if self.begin_stop() {
            self.release().await;
            let notice = SessionExit {
                session_id: self.id().clone(),
                instance: self.instance(),
                owner: self.owner().clone(),
                reason,
            };
            if self.exits.send(notice).is_err() {
                tracing::debug!(session_id = %self.id(), "No reaper for session exit");
            }
        }
    }

    /// Applies queued input in order. A write that stalls only holds up this
    /// session's own input.
    async fn write_loop(self: Arc<Self>, mut input: mpsc::UnboundedReceiver<Vec<u8>>) {
        loop {
            let data = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                data = input.recv() => match data {
                    Some(data) => data,
                    None => break,
                },
            };

            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                written = self.write_input(&data) => written,
            };
            if let Err(e) = written {
                tracing::warn!(session_id = %self.id(), error = %e, "Input not delivered");
            }
        }
        tracing::trace!(session_id = %self.id(), "Write loop stopped");
    }

    /// Forwards output still buffered in the terminal once the shell is gone.
    fn drain(&self, file: &File, buf: &mut [u8]) {
        for _ in 0..DRAIN_LIMIT {
            match read_chunk(file, buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => self.emit(&buf[..n]),
            }
        }
    }

    fn emit(&self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        self.sink
            .deliver(self.owner(), ServerEvent::output(self.id(), text));
    }

    async fn child_exited(&self) -> bool {
        let mut child = self.child.lock().await;
        let Some(child) = child.as_mut() else {
            return true;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(
                    session_id = %self.id(),
                    exit_code = status.exit_code(),
                    "Shell exited"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(session_id = %self.id(), error = %e, "Failed to poll shell status");
                false
            }
        }
    }

    /// Queues input for the session's writer task and returns immediately.
    ///
    /// Queued input is applied in call order.
    pub fn queue_input(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning(self.id().clone()));
        }
        self.input
            .send(data.to_vec())
            .map_err(|_| SessionError::NotRunning(self.id().clone()))
    }

    /// Writes input to the terminal as if typed by the user and waits until
    /// it is accepted.
    ///
    /// Writes are serialized, so input is applied in call order.
    pub async fn write_input(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning(self.id().clone()));
        }
        let io = self
            .io
            .read()
            .await
            .clone()
            .ok_or_else(|| SessionError::NotRunning(self.id().clone()))?;

        let _writer = self.write_lock.lock().await;
        let write_all = async {
            let mut written = 0;
            while written < data.len() {
                let mut guard = io.writable().await?;
                match guard.try_io(|inner| {
                    let mut file: &File = inner.get_ref();
                    file.write(&data[written..])
                }) {
                    Ok(Ok(0)) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                    Ok(Ok(n)) => written += n,
                    Ok(Err(e)) => return Err(e),
                    Err(_would_block) => continue,
                }
            }
            Ok::<(), io::Error>(())
        };

        match tokio::time::timeout(WRITE_TIMEOUT, write_all).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::WriteFailed(e.to_string())),
            Err(_) => Err(SessionError::WriteFailed("write timed out".to_string())),
        }
    }

    /// Changes the terminal window size.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning(self.id().clone()));
        }

        let master = self.master.lock().await;
        let master = master
            .as_ref()
            .ok_or_else(|| SessionError::NotRunning(self.id().clone()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        self.cols.store(cols, Ordering::SeqCst);
        self.rows.store(rows, Ordering::SeqCst);

        tracing::debug!(session_id = %self.id(), cols, rows, "Resized PTY");
        Ok(())
    }

    /// Stops the session: terminates the shell and releases the terminal.
    ///
    /// Only the first call does any work and returns true; later calls,
    /// from any caller, return false.
    pub async fn stop(&self) -> bool {
        if !self.begin_stop() {
            return false;
        }
        self.complete_stop().await;
        true
    }

    /// Marks the session as stopping without waiting for anything.
    ///
    /// Input, resize and the read loop stop right away. Returns true only for
    /// the first caller, which must then run [`complete_stop`](Self::complete_stop).
    pub fn begin_stop(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Stopping);
        self.cancel.cancel();
        true
    }

    /// Terminates the shell, releases the terminal and waits for the read
    /// loop to finish.
    pub async fn complete_stop(&self) {
        self.release().await;

        let reader = self.reader.lock().await.take();
        if let Some(handle) = reader {
            let wait = self.config.poll_interval() * 2;
            if tokio::time::timeout(wait, handle).await.is_err() {
                tracing::warn!(session_id = %self.id(), "Read loop did not stop in time");
            }
        }
    }

    async fn release(&self) {
        if let Some(handle) = self.activation.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.writer.lock().await.take() {
            handle.abort();
        }

        self.terminate_child().await;

        self.io.write().await.take();
        self.master.lock().await.take();

        self.set_state(SessionState::Closed);
        tracing::info!(session_id = %self.id(), "Terminal session closed");
    }

    /// Sends SIGHUP and SIGTERM to the shell's process group, then SIGKILL
    /// if it outlives the grace period.
    async fn terminate_child(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        // Interactive shells ignore SIGTERM; the hangup is what ends them.
        let pid = self.pid();
        if let Some(pid) = pid {
            signal_group(pid, Signal::SIGHUP);
            signal_group(pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + self.config.terminate_timeout();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(
                        session_id = %self.id(),
                        exit_code = status.exit_code(),
                        "Shell terminated"
                    );
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(session_id = %self.id(), error = %e, "Failed to poll shell status");
                    break;
                }
            }
        }

        tracing::warn!(session_id = %self.id(), pid = ?pid, "Shell ignored termination, killing");
        if let Some(pid) = pid {
            signal_group(pid, Signal::SIGKILL);
        }
        if let Err(e) = child.kill() {
            tracing::debug!(session_id = %self.id(), error = %e, "Kill after SIGKILL failed");
        }
        if let Err(e) = tokio::task::spawn_blocking(move || child.wait()).await {
            tracing::warn!(session_id = %self.id(), error = %e, "Failed to reap shell");
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.options.id
    }

    /// Returns the registry sequence number of this session.
    pub fn instance(&self) -> u64 {
        self.options.instance
    }

    /// Returns the client that owns this session.
    pub fn owner(&self) -> &ClientId {
        &self.options.owner
    }

    /// Returns the directory the shell was started in.
    pub fn working_directory(&self) -> &Path {
        &self.options.working_directory
    }

    /// Returns the environment activated in this session, if any.
    pub fn environment(&self) -> Option<&Environment> {
        self.options.environment.as_ref()
    }

    /// Returns the shell's process ID once spawned.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Returns the current terminal size as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        (
            self.cols.load(Ordering::SeqCst),
            self.rows.load(Ordering::SeqCst),
        )
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns whether the session is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns why the shell ended, if it ended on its own.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason.get().copied()
    }
}

/// Duplicates the master descriptor and registers it with the reactor in
/// non-blocking mode.
fn nonblocking_master(master: &dyn MasterPty) -> io::Result<AsyncFd<File>> {
    let raw = master
        .as_raw_fd()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "PTY master has no descriptor"))?;

    // SAFETY: `raw` is owned by `master`, which is alive for this call; the
    // duplicate gets its own descriptor.
    let owned: OwnedFd = unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned()?;
    set_nonblocking(&owned)?;
    AsyncFd::with_interest(File::from(owned), Interest::READABLE | Interest::WRITABLE)
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl on a valid descriptor owned by the caller.
    let flags = unsafe { nix::libc::fcntl(raw, nix::libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { nix::libc::fcntl(raw, nix::libc::F_SETFL, flags | nix::libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn read_chunk(file: &File, buf: &mut [u8]) -> io::Result<usize> {
    let mut file = file;
    file.read(buf)
}

/// Linux reports EIO on the master once every subordinate descriptor is closed.
fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::libc::EIO)
}

fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), signal) {
        tracing::debug!(pid, signal = ?signal, error = %e, "Failed to signal process group");
    }
}
