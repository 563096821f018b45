//! Source text validation ahead of an engine call.

use std::ffi::CString;

use crate::error::{Error, RejectReason, Result};

/// Sources of this many bytes or more are refused (10 MB).
pub const MAX_SOURCE_BYTES: usize = 10_000_000;

/// Outcome of validating a program before it reaches the engine.
#[derive(Debug, PartialEq, Eq)]
pub enum Prepared {
    /// Only whitespace: succeeds trivially without an engine call.
    Empty,
    /// NUL-terminated copy of the source, valid for the whole call.
    Program(CString),
}

/// Check a program's bytes and build the C string handed to the engine.
///
/// The engine receives the source untrimmed; trimming only decides emptiness.
pub fn prepare(source: &[u8]) -> Result<Prepared> {
    let text =
        std::str::from_utf8(source).map_err(|_| Error::InputRejected(RejectReason::InvalidEncoding))?;

    if text.trim().is_empty() {
        return Ok(Prepared::Empty);
    }

    if text.len() >= MAX_SOURCE_BYTES {
        return Err(Error::InputRejected(RejectReason::TooLarge));
    }

    CString::new(text)
        .map(Prepared::Program)
        .map_err(|_| Error::InputRejected(RejectReason::NullByte))
}
