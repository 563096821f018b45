//! Long-lived interactive engine process (`<exe> --repl`).
//!
//! ```text
//! ReplSession
//!     ├── stdin  ◄── send(line)
//!     ├── reader task: merged stdout+stderr pipe ──► OutputBuffer ──► subscribers
//!     └── supervisor task: waits for exit, or for stop() → grace window → kill
//! ```
//!
//! Whoever moves the session from `Running` to `Stopped` (the supervisor on a
//! natural exit, or `stop()`) does the teardown; the other side finds it
//! already stopped and does nothing.

use std::io;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::sys;

use super::REPL_FLAG;
use super::locate::ExecutableLocator;
use super::output::{OutputBuffer, SessionEvent, Utf8Decoder};

/// How long teardown waits for the reader to drain after the child is gone.
const READER_DRAIN: Duration = Duration::from_millis(250);

/// Extra time `stop()` allows the supervisor beyond the grace window.
const KILL_WAIT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Whether a session currently has a live engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Stopped,
    Running,
}

enum SessionState {
    Stopped,
    Running(Running),
}

struct Running {
    generation: u64,
    pid: Option<u32>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    stop_tx: oneshot::Sender<()>,
    supervisor: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Interactive engine process with streamed output.
///
/// Lifecycle calls are idempotent: `start()` while running and `stop()` or
/// `send()` while stopped do nothing. The output buffer persists across
/// restarts until `clear_output()` is called.
pub struct ReplSession {
    locator: ExecutableLocator,
    grace: Duration,
    state: Arc<Mutex<SessionState>>,
    output: Arc<OutputBuffer>,
    generation: AtomicU64,
}

impl ReplSession {
    /// Session whose engine is found by `locator`.
    pub fn new(locator: ExecutableLocator) -> Self {
        Self {
            locator,
            grace: BridgeConfig::default().shutdown_grace(),
            state: Arc::new(Mutex::new(SessionState::Stopped)),
            output: Arc::new(OutputBuffer::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Session configured from a `BridgeConfig`.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(ExecutableLocator::from_config(config)).with_shutdown_grace(config.shutdown_grace())
    }

    /// How long `stop()` lets the engine exit on end-of-input before killing it.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        match *self.lock_state() {
            SessionState::Running(_) => SessionStatus::Running,
            SessionState::Stopped => SessionStatus::Stopped,
        }
    }

    /// OS process id of the running engine.
    pub fn pid(&self) -> Option<u32> {
        match &*self.lock_state() {
            SessionState::Running(running) => running.pid,
            SessionState::Stopped => None,
        }
    }

    /// Spawn the engine in interactive mode. A no-op when already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        // Held until the new session is recorded, so a child that exits
        // immediately cannot be observed by its supervisor before it exists.
        let mut state = self.lock_state();
        if matches!(*state, SessionState::Running(_)) {
            return Ok(());
        }

        let executable = self.locator.find().ok_or(Error::ExecutableNotFound)?;
        let (read, write) = sys::pipe()?;
        let stderr_write = write.try_clone()?;

        let mut child = spawn_repl(&executable, write, stderr_write)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Io(io::Error::other("engine stdin unavailable")))?;
        let receiver = pipe::Receiver::from_owned_fd(read)?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pid = child.id();
        let reader = tokio::spawn(read_output(receiver, Arc::clone(&self.output)));
        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(Supervised {
            child,
            stop_rx,
            grace: self.grace,
            generation,
            state: Arc::clone(&self.state),
            output: Arc::clone(&self.output),
        }));

        *state = SessionState::Running(Running {
            generation,
            pid,
            stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))),
            stop_tx,
            supervisor,
            reader,
        });

        tracing::info!(?pid, "Interactive session started with {}", executable.display());
        Ok(())
    }

    /// Write `line` plus a newline to the engine's stdin. A no-op unless running.
    ///
    /// A failed write is reported in the output buffer, not returned.
    pub async fn send(&self, line: &str) {
        let stdin = match &*self.lock_state() {
            SessionState::Running(running) => Arc::clone(&running.stdin),
            SessionState::Stopped => return,
        };

        let mut stdin = stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return;
        };

        if let Err(e) = write_line(pipe, line).await {
            tracing::warn!("Failed to send input to engine: {}", e);
            self.output.append(&format!("\n[failed to send input: {}]\n", e));
        }
    }

    /// Stop the engine: end its input, give it the grace window, then kill it.
    /// A no-op when already stopped.
    pub async fn stop(&self) {
        let running = match std::mem::replace(&mut *self.lock_state(), SessionState::Stopped) {
            SessionState::Running(running) => running,
            SessionState::Stopped => return,
        };
        tracing::info!(pid = ?running.pid, "Stopping interactive session");

        // Signal first: a send() blocked on a full pipe holds the stdin lock
        // until the kill breaks the pipe.
        let _ = running.stop_tx.send(());
        running.stdin.lock().await.take();

        let mut supervisor = running.supervisor;
        if tokio::time::timeout(self.grace + KILL_WAIT, &mut supervisor)
            .await
            .is_err()
        {
            tracing::warn!("Session supervisor did not finish, abandoning it");
            supervisor.abort();
        }
        finish_reader(running.reader).await;
    }

    /// Everything the session has output so far.
    pub fn output(&self) -> String {
        self.output.snapshot()
    }

    /// Empty the output buffer.
    pub fn clear_output(&self) {
        self.output.clear();
    }

    /// Stream of output appends and exit notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.output.subscribe()
    }
}

impl Drop for ReplSession {
    fn drop(&mut self) {
        if let SessionState::Running(running) =
            std::mem::replace(&mut *self.lock_state(), SessionState::Stopped)
        {
            // Dropping the child inside the supervisor kills it.
            running.supervisor.abort();
            running.reader.abort();
        }
    }
}

fn spawn_repl(executable: &Path, stdout: OwnedFd, stderr: OwnedFd) -> Result<Child> {
    // The command owns the parent's copies of the write ends; they are
    // closed when it drops, so the reader sees EOF once the child is gone.
    let mut command = Command::new(executable);
    command
        .arg(REPL_FLAG)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    command.spawn().map_err(Error::ProcessSpawnFailed)
}

async fn write_line(pipe: &mut ChildStdin, line: &str) -> io::Result<()> {
    let mut payload = String::with_capacity(line.len() + 1);
    payload.push_str(line);
    payload.push('\n');
    pipe.write_all(payload.as_bytes()).await?;
    pipe.flush().await
}

async fn read_output(mut receiver: pipe::Receiver, output: Arc<OutputBuffer>) {
    let mut decoder = Utf8Decoder::default();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match receiver.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => output.append(&decoder.push(&chunk[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Session output read failed: {}", e);
                break;
            }
        }
    }
    output.append(&decoder.finish());
}

async fn finish_reader(mut reader: JoinHandle<()>) {
    // A grandchild holding the pipe open would keep the reader alive forever.
    if tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
        reader.abort();
    }
}

struct Supervised {
    child: Child,
    stop_rx: oneshot::Receiver<()>,
    grace: Duration,
    generation: u64,
    state: Arc<Mutex<SessionState>>,
    output: Arc<OutputBuffer>,
}

async fn supervise(mut s: Supervised) {
    let exited = tokio::select! {
        status = s.child.wait() => Some(status),
        _ = &mut s.stop_rx => None,
    };

    let Some(status) = exited else {
        // stop() owns the teardown; make sure the process is gone.
        if tokio::time::timeout(s.grace, s.child.wait()).await.is_err() {
            tracing::debug!("Engine ignored end of input, killing it");
            if let Err(e) = s.child.kill().await {
                tracing::warn!("Failed to kill engine process: {}", e);
            }
        }
        return;
    };

    let running = {
        let mut state = s.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = matches!(
            &*state,
            SessionState::Running(running) if running.generation == s.generation
        );
        if current {
            match std::mem::replace(&mut *state, SessionState::Stopped) {
                SessionState::Running(running) => Some(running),
                SessionState::Stopped => None,
            }
        } else {
            None
        }
    };

    // None: stop() won the race and tears down without a notice.
    let Some(running) = running else {
        return;
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("Failed to wait for engine process: {}", e);
            None
        }
    };
    tracing::info!(?code, "Interactive engine exited");

    running.stdin.lock().await.take();
    finish_reader(running.reader).await;
    s.output.exited(code);
}
