//! Execution bridge for the Mufi scripting engine.
//!
//! This crate provides:
//! - Embedded execution through the engine's C ABI, with stdout/stderr capture
//! - One-shot runs of the engine executable with a timeout
//! - Interactive sessions with streamed, merged output
//! - Engine discovery and configuration
//!
//! # Module Structure
//!
//! - `capture` - Redirects descriptors 1 and 2 into a pipe around a call
//! - `config` - `BridgeConfig`: file, environment and defaults
//! - `engine` - `EmbeddedEngine` over a dynamically loaded engine library
//! - `error` - Error types
//! - `process` - `ProcessRunner`, `ReplSession` and executable discovery

#[cfg(not(unix))]
compile_error!("mufi-bridge requires a unix platform (pipes and descriptor redirection)");

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod process;

mod sys;

pub use capture::{StdioCapture, capture};
pub use config::BridgeConfig;
pub use engine::{
    EmbeddedEngine, EngineApi, EngineState, ExecutionResult, InitOptions, LibraryEngine,
};
pub use error::{Error, RejectReason, Result};
pub use process::{
    ExecutableLocator, LibraryLocator, ProcessRunner, ReplSession, SessionEvent, SessionStatus,
};
