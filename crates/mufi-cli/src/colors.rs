//! ANSI escapes used to style `mufi` messages.

use std::io::{self, Write};

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const RED: &str = "\x1b[31m";

/// Push engine output that ends mid-line to the terminal now.
#[inline]
pub fn flush_stdout() {
    io::stdout().flush().ok();
}
