//! Descriptor-level capture of stdout/stderr around a synchronous call.
//!
//! The engine writes straight to file descriptors 1 and 2, so capturing its
//! output means repointing those descriptors at a pipe for the duration of the
//! call and restoring them afterwards:
//!
//! ```text
//! pipe() ──► dup(1), dup(2) saved ──► dup2(pipe_w, 1|2) ──► body()
//!                                                            │
//!   decoded text ◄── drain pipe_r to EOF ◄── dup2(saved, 1|2) ◄┘
//! ```
//!
//! The redirection is process-wide. Every capture in the process is
//! serialized on one lock, and anything another thread writes to stdout or
//! stderr during the window lands in the captured text as well.
//!
//! If the pipe or any descriptor step fails, the body still runs, uncaptured,
//! and the captured text is empty.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::sys;

/// Creates the `(read, write)` pipe a capture drains.
pub type PipeFactory = fn() -> io::Result<(OwnedFd, OwnedFd)>;

/// Serializes every redirection window in the process.
static REDIRECT_LOCK: Mutex<()> = Mutex::new(());

const STDOUT: i32 = libc::STDOUT_FILENO;
const STDERR: i32 = libc::STDERR_FILENO;

/// Run `body` with stdout/stderr captured, using the default OS pipe.
pub fn capture<T>(body: impl FnOnce() -> T) -> (T, String) {
    StdioCapture::new().run(body)
}

/// Captures what a call writes to the process's stdout and stderr.
#[derive(Debug, Clone, Copy)]
pub struct StdioCapture {
    make_pipe: PipeFactory,
}

impl Default for StdioCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioCapture {
    /// Capture through a regular OS pipe.
    pub fn new() -> Self {
        Self {
            make_pipe: sys::pipe,
        }
    }

    /// Capture through a custom pipe source (tests use this to force failures).
    pub fn with_pipe_factory(make_pipe: PipeFactory) -> Self {
        Self { make_pipe }
    }

    /// Run `body`, returning its value and everything written to fd 1 and 2
    /// while it ran, in emission order.
    ///
    /// Invalid UTF-8 is decoded lossily. Setup failures degrade to running
    /// `body` without capture.
    pub fn run<T>(&self, body: impl FnOnce() -> T) -> (T, String) {
        let _window = REDIRECT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        let redirect = match Redirect::install(self.make_pipe) {
            Ok(redirect) => redirect,
            Err(e) => {
                tracing::warn!("Output capture unavailable, running uncaptured: {}", e);
                return (body(), String::new());
            }
        };

        let value = body();
        let bytes = redirect.finish();
        (value, decode_lossy(bytes))
    }
}

/// An installed redirection. Dropping it restores the original descriptors.
struct Redirect {
    saved_stdout: OwnedFd,
    saved_stderr: OwnedFd,
    drain: Option<JoinHandle<io::Result<Vec<u8>>>>,
    restored: bool,
}

impl Redirect {
    fn install(make_pipe: PipeFactory) -> io::Result<Self> {
        let (read, write) = make_pipe()?;
        let saved_stdout = sys::dup_std(STDOUT)?;
        let saved_stderr = sys::dup_std(STDERR)?;

        // Drain concurrently so output larger than the pipe buffer cannot
        // block the writer. The thread sees EOF once every write end is gone.
        let drain = thread::Builder::new()
            .name("mufi-capture".to_string())
            .spawn(move || {
                let mut bytes = Vec::new();
                File::from(read).read_to_end(&mut bytes)?;
                Ok(bytes)
            })?;

        let redirect = Self {
            saved_stdout,
            saved_stderr,
            drain: Some(drain),
            restored: false,
        };

        sys::flush_std();
        // From here on an early return drops `redirect`, which restores.
        sys::dup2(write.as_raw_fd(), STDOUT)?;
        sys::dup2(write.as_raw_fd(), STDERR)?;
        drop(write);

        Ok(redirect)
    }

    /// Flush, restore the original descriptors and collect the drained bytes.
    fn finish(mut self) -> Vec<u8> {
        sys::flush_std();
        self.restore();

        match self.drain.take().map(JoinHandle::join) {
            Some(Ok(Ok(bytes))) => bytes,
            Some(Ok(Err(e))) => {
                tracing::warn!("Failed to drain captured output: {}", e);
                Vec::new()
            }
            Some(Err(_)) => {
                tracing::warn!("Capture drain thread panicked");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        let stdout = sys::dup2(self.saved_stdout.as_raw_fd(), STDOUT);
        let stderr = sys::dup2(self.saved_stderr.as_raw_fd(), STDERR);
        if let Err(e) = stdout.and(stderr) {
            tracing::warn!("Failed to restore standard streams: {}", e);
        }
    }
}

impl Drop for Redirect {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Decode captured bytes, replacing invalid sequences instead of failing.
pub(crate) fn decode_lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
        Err(io::Error::other("pipes exhausted"))
    }

    #[test]
    fn test_failed_pipe_still_runs_body() {
        let capture = StdioCapture::with_pipe_factory(failing_pipe);
        let mut ran = false;
        let (value, text) = capture.run(|| {
            ran = true;
            7
        });

        assert!(ran);
        assert_eq!(value, 7);
        assert!(text.is_empty());
    }

    #[test]
    fn test_decode_lossy() {
        assert_eq!(decode_lossy(b"plain".to_vec()), "plain");
        assert_eq!(decode_lossy(vec![b'a', 0xff, b'b']), "a\u{fffd}b");
    }
}
