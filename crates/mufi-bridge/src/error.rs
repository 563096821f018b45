//! Error types for mufi-bridge.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for mufi-bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a source text was refused before reaching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The text contains a NUL byte and cannot be passed as a C string.
    NullByte,
    /// The text is at or above the maximum accepted size.
    TooLarge,
    /// The bytes are not valid UTF-8.
    InvalidEncoding,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NullByte => "source contains a NUL byte",
            Self::TooLarge => "source exceeds the maximum size",
            Self::InvalidEncoding => "source is not valid UTF-8",
        };
        f.write_str(text)
    }
}

/// Errors that can occur in mufi-bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// The embedded engine has not been initialized (or was deinitialized).
    #[error("engine is not initialized")]
    NotInitialized,

    /// The engine's init call reported a non-zero code.
    #[error("engine initialization failed with code {0}")]
    InitializationFailed(i32),

    /// Source text was refused before any engine call.
    #[error("input rejected: {0}")]
    InputRejected(RejectReason),

    /// The embedded engine finished with a non-zero status.
    #[error("execution failed with status {status}{}", fmt_output(output))]
    ExecutionFailed { status: u8, output: String },

    /// No engine executable could be located.
    #[error("engine executable not found")]
    ExecutableNotFound,

    /// No engine shared library could be located.
    #[error("engine library not found")]
    LibraryNotFound,

    /// Failed to open the engine library or resolve one of its symbols.
    #[error("failed to load engine library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// The engine executable exists but could not be started.
    #[error("failed to spawn engine process: {0}")]
    ProcessSpawnFailed(#[source] std::io::Error),

    /// A one-shot run exited with a non-zero code.
    #[error("engine process exited with code {exit_code}{}", fmt_output(stderr))]
    ProcessFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The caller-side wait exceeded its deadline.
    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),

    /// A blocking worker task panicked or was cancelled.
    #[error("execution task failed: {0}")]
    TaskFailed(String),

    /// Invalid configuration file or value.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_output(output: &str) -> String {
    let trimmed = output.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{}", trimmed)
    }
}

impl Error {
    /// Render the error followed by a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::NotInitialized => Some("call initialize() before interpreting source"),
            Self::ExecutableNotFound => Some(
                "install `mufiz` on PATH, or set MUFI_EXECUTABLE to the engine executable",
            ),
            Self::LibraryNotFound => Some(
                "set MUFI_LIBRARY to the engine shared library, or use `--mode process`",
            ),
            Self::LibraryLoad(_) => {
                Some("the library may be built for another architecture or be missing symbols")
            }
            Self::InputRejected(RejectReason::TooLarge) => {
                Some("split the program into smaller files")
            }
            Self::TimedOut(_) => Some("raise --timeout, or run in process mode to allow a hard kill"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failed_message_keeps_stderr() {
        let err = Error::ProcessFailed {
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom\n".to_string(),
        };
        assert_eq!(err.to_string(), "engine process exited with code 2:\nboom");
    }

    #[test]
    fn test_execution_failed_without_output() {
        let err = Error::ExecutionFailed {
            status: 1,
            output: "  \n".to_string(),
        };
        assert_eq!(err.to_string(), "execution failed with status 1");
    }

    #[test]
    fn test_with_hint() {
        let hinted = Error::ExecutableNotFound.with_hint();
        assert!(hinted.starts_with("engine executable not found"));
        assert!(hinted.contains("MUFI_EXECUTABLE"));

        assert_eq!(Error::Config("bad".into()).with_hint(), "configuration error: bad");
    }
}
