//! Embedded engine gateway.
//!
//! Owns the engine's lifecycle and funnels every call through one lock.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::capture::StdioCapture;
use crate::config::BridgeConfig;
use crate::error::{Error, RejectReason, Result};
use crate::process::LibraryLocator;

use super::ffi::{EngineApi, InitOptions, LibraryEngine};
use super::source::{self, Prepared};

/// Lifecycle state of the embedded engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
}

/// Status and captured text of one embedded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Engine status code; 0 means success.
    pub status: u8,
    /// Everything written to stdout/stderr during the run, in emission order.
    pub output: String,
    /// Wall-clock time spent inside the gateway, excluding time queued on the lock.
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Whether the engine reported success.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero status into `Error::ExecutionFailed`, keeping the output.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::ExecutionFailed {
                status: self.status,
                output: self.output,
            })
        }
    }
}

struct EngineSlot {
    api: Box<dyn EngineApi>,
    state: EngineState,
    capture: StdioCapture,
}

impl EngineSlot {
    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            EngineState::Ready => Ok(()),
            EngineState::Uninitialized => Err(Error::NotInitialized),
        }
    }
}

/// Gateways opened from a library, keyed by its canonical path.
///
/// The engine keeps its state in process-wide globals, so every gateway onto
/// the same library must share one slot.
static LOADED: LazyLock<Mutex<HashMap<PathBuf, Weak<Mutex<EngineSlot>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

impl Drop for EngineSlot {
    fn drop(&mut self) {
        if self.state == EngineState::Ready {
            self.api.deinit();
        }
    }
}

/// Gateway to an in-process engine.
///
/// Clones share the same engine, as do gateways loaded from the same library
/// file. At most one call is inside the engine at any
/// time; other callers block on the gateway's lock until it is released.
///
/// # Cancellation
///
/// A call that has entered the engine cannot be interrupted. `interpret_timeout`
/// only stops *waiting*: the abandoned call keeps running on a blocking thread,
/// holding the lock, until the engine returns. Use the process runner when a
/// hard stop is required.
#[derive(Clone)]
pub struct EmbeddedEngine {
    slot: Arc<Mutex<EngineSlot>>,
}

impl EmbeddedEngine {
    /// Wrap an engine implementation. The engine starts uninitialized.
    pub fn new(api: impl EngineApi + 'static) -> Self {
        Self::with_capture(api, StdioCapture::new())
    }

    /// Wrap an engine implementation with a custom output capture.
    pub fn with_capture(api: impl EngineApi + 'static, capture: StdioCapture) -> Self {
        Self {
            slot: Arc::new(Mutex::new(EngineSlot {
                api: Box::new(api),
                state: EngineState::Uninitialized,
                capture,
            })),
        }
    }

    /// Load the engine from a shared library.
    ///
    /// Loading a library that already backs a live gateway returns that
    /// gateway, including its lifecycle state.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Self::shared(key, StdioCapture::new(), |key| {
            let api = LibraryEngine::load(key)?;
            tracing::info!("Engine library loaded from {}", api.path().display());
            Ok(Box::new(api))
        })
    }

    /// Return the live gateway registered under `key`, or open a new one.
    fn shared(
        key: PathBuf,
        capture: StdioCapture,
        open: impl FnOnce(&Path) -> Result<Box<dyn EngineApi>>,
    ) -> Result<Self> {
        let mut loaded = LOADED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = loaded.get(&key).and_then(Weak::upgrade) {
            tracing::debug!("Reusing engine gateway for {}", key.display());
            return Ok(Self { slot });
        }

        let slot = Arc::new(Mutex::new(EngineSlot {
            api: open(&key)?,
            state: EngineState::Uninitialized,
            capture,
        }));
        loaded.retain(|_, slot| slot.strong_count() > 0);
        loaded.insert(key, Arc::downgrade(&slot));
        Ok(Self { slot })
    }

    /// Find the engine library described by `config` and load it.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let path = LibraryLocator::from_config(config)
            .find()
            .ok_or(Error::LibraryNotFound)?;
        Self::load(path)
    }

    fn lock(&self) -> MutexGuard<'_, EngineSlot> {
        // A panic inside an engine call poisons the lock; the slot is still
        // consistent because state only changes after the call returns.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    /// Allocate engine state. A no-op when already ready.
    pub fn initialize(&self, options: &InitOptions) -> Result<()> {
        let mut slot = self.lock();
        if slot.state == EngineState::Ready {
            return Ok(());
        }

        let code = slot.api.init(options);
        if code != 0 {
            tracing::warn!("Engine init returned {}", code);
            return Err(Error::InitializationFailed(code));
        }

        slot.state = EngineState::Ready;
        tracing::info!(?options, "Embedded engine initialized");
        Ok(())
    }

    /// Tear down engine state. A no-op when already uninitialized.
    pub fn deinitialize(&self) {
        let mut slot = self.lock();
        if slot.state == EngineState::Uninitialized {
            return;
        }

        slot.api.deinit();
        slot.state = EngineState::Uninitialized;
        tracing::info!("Embedded engine deinitialized");
    }

    /// Run a program and capture what it prints.
    ///
    /// Blocks until every call queued ahead of it and the call itself finish.
    /// A whitespace-only program succeeds with empty output without reaching
    /// the engine. A non-zero engine status is returned as a value, not an error.
    pub fn interpret(&self, source: &str) -> Result<ExecutionResult> {
        self.interpret_bytes(source.as_bytes())
    }

    /// Like `interpret`, for source that has not been checked for UTF-8 yet.
    pub fn interpret_bytes(&self, source: &[u8]) -> Result<ExecutionResult> {
        let mut guard = self.lock();
        guard.ensure_ready()?;

        let start = Instant::now();
        let program = match source::prepare(source)? {
            Prepared::Empty => {
                return Ok(ExecutionResult {
                    status: 0,
                    output: String::new(),
                    elapsed: start.elapsed(),
                });
            }
            Prepared::Program(program) => program,
        };

        tracing::debug!(bytes = program.as_bytes().len(), "Running program in embedded engine");

        let slot = &mut *guard;
        let capture = slot.capture;
        let (status, output) = capture.run(|| slot.api.run(&program));
        let elapsed = start.elapsed();

        tracing::debug!(status, ?elapsed, "Embedded run finished");
        Ok(ExecutionResult {
            status,
            output,
            elapsed,
        })
    }

    /// Run a program on the blocking pool, giving up the wait after `timeout`.
    ///
    /// On expiry this returns `Error::TimedOut`, but the engine call itself
    /// carries on in the background and still holds the gateway until it ends.
    pub async fn interpret_timeout(
        &self,
        source: String,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let engine = self.clone();
        let task = tokio::task::spawn_blocking(move || engine.interpret(&source));

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        "Embedded run exceeded {:?}; the call keeps running in the background",
                        limit
                    );
                    return Err(Error::TimedOut(limit));
                }
            },
            None => task.await,
        };

        joined.map_err(|e| Error::TaskFailed(e.to_string()))?
    }

    /// Whether the engine reports outstanding allocations.
    pub fn has_leaks(&self) -> Result<bool> {
        let mut slot = self.lock();
        slot.ensure_ready()?;
        Ok(slot.api.has_leaks())
    }

    /// Capture the engine's allocator statistics and log them.
    pub fn print_stats(&self) -> Result<String> {
        let mut guard = self.lock();
        guard.ensure_ready()?;

        let slot = &mut *guard;
        let capture = slot.capture;
        let ((), stats) = capture.run(|| slot.api.print_stats());
        tracing::debug!("Engine stats:\n{}", stats.trim_end());
        Ok(stats)
    }

    /// Copy `value` through the engine's allocator and back.
    ///
    /// The engine-owned copy is always released through the engine's own
    /// free call, including on the error path.
    pub fn duplicate_string(&self, value: &str) -> Result<String> {
        let value =
            CString::new(value).map_err(|_| Error::InputRejected(RejectReason::NullByte))?;

        let mut slot = self.lock();
        slot.ensure_ready()?;

        let ptr = slot.api.strdup(&value);
        if ptr.is_null() {
            return Err(Error::Io(io::Error::from(io::ErrorKind::OutOfMemory)));
        }

        let owned = EngineString {
            api: slot.api.as_mut(),
            ptr,
        };
        Ok(owned.to_string_lossy())
    }
}

/// String allocated by the engine, freed through the engine on drop.
struct EngineString<'a> {
    api: &'a mut dyn EngineApi,
    ptr: *mut c_char,
}

impl EngineString<'_> {
    fn to_string_lossy(&self) -> String {
        // Safety: `ptr` is a non-null, NUL-terminated string from `strdup`.
        unsafe { CStr::from_ptr(self.ptr) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for EngineString<'_> {
    fn drop(&mut self) {
        // Safety: `ptr` came from this engine's `strdup` and is freed once.
        unsafe { self.api.free_cstring(self.ptr) }
    }
}
