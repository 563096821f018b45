//! In-process execution through the engine's C ABI.
//!
//! ```text
//! EmbeddedEngine (lock: one call in flight, process-wide for this engine)
//!     │
//!     ├── source::prepare   UTF-8 / size / NUL checks, empty short-circuit
//!     │
//!     └── StdioCapture      fd 1/2 → pipe for the duration of the call
//!             │
//!             └── EngineApi::run → LibraryEngine (libloading) or a test double
//! ```
//!
//! # Module Structure
//!
//! - `ffi` - C signatures, symbol names, `EngineApi` and `LibraryEngine`
//! - `gateway` - `EmbeddedEngine`: lifecycle, locking, capture, diagnostics
//! - `source` - Source validation

mod ffi;
mod gateway;
mod source;

pub use ffi::{EngineApi, InitOptions, LibraryEngine};
pub use gateway::{EmbeddedEngine, EngineState, ExecutionResult};
pub use source::MAX_SOURCE_BYTES;
