//! Out-of-process execution through the engine executable.
//!
//! Two shapes are supported:
//!
//! - **`ProcessRunner`** - One process per program: `<exe> --run <file>`.
//!   Isolated from the embedded gateway and from other runs; a timeout kills
//!   the child.
//! - **`ReplSession`** - One long-lived `<exe> --repl` process fed line by
//!   line, with stdout and stderr merged into a single ordered buffer.
//!
//! ```text
//! ExecutableLocator ──► explicit path │ PATH │ install dirs │ dev paths
//!         │
//!         ├── ProcessRunner ──► temp file ──► child ──► stdout (+ stderr)
//!         │
//!         └── ReplSession ──► child stdin
//!                 └── merged pipe ──► OutputBuffer ──► SessionEvent subscribers
//! ```

mod locate;
mod output;
mod runner;
mod session;

/// Argument telling the engine executable to run a program file.
pub const RUN_FLAG: &str = "--run";

/// Argument telling the engine executable to start its interactive mode.
pub const REPL_FLAG: &str = "--repl";

pub use locate::{
    DEFAULT_EXECUTABLE_NAME, DEFAULT_LIBRARY_NAME, ExecutableLocator, LibraryLocator,
    is_executable,
};
pub use output::SessionEvent;
pub use runner::ProcessRunner;
pub use session::{ReplSession, SessionStatus};
