//! Foreign call surface of the engine library.
//!
//! The engine exports a small C ABI. `EngineApi` is the seam the gateway talks
//! to; `LibraryEngine` implements it over a dynamically loaded library, and
//! tests substitute their own implementations.

use std::ffi::{CStr, c_char, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;
use serde::Deserialize;

use crate::error::Result;

/// `engine_init(leak_detection, tracking, safety_checks) -> int`
pub type InitFn = unsafe extern "C" fn(bool, bool, bool) -> c_int;
/// `engine_deinit() -> void`
pub type DeinitFn = unsafe extern "C" fn();
/// `engine_run(const char*) -> uint8_t`
pub type RunFn = unsafe extern "C" fn(*const c_char) -> u8;
/// `engine_has_leaks() -> bool`
pub type HasLeaksFn = unsafe extern "C" fn() -> bool;
/// `engine_print_stats() -> void`
pub type PrintStatsFn = unsafe extern "C" fn();
/// `engine_strdup(const char*) -> char*`
pub type StrdupFn = unsafe extern "C" fn(*const c_char) -> *mut c_char;
/// `engine_free_cstring(char*) -> void`
pub type FreeCStringFn = unsafe extern "C" fn(*mut c_char);

pub const SYM_INIT: &[u8] = b"mufi_init\0";
pub const SYM_DEINIT: &[u8] = b"mufi_deinit\0";
pub const SYM_RUN: &[u8] = b"mufi_run\0";
pub const SYM_HAS_LEAKS: &[u8] = b"mufi_has_leaks\0";
pub const SYM_PRINT_STATS: &[u8] = b"mufi_print_stats\0";
pub const SYM_STRDUP: &[u8] = b"mufi_strdup\0";
pub const SYM_FREE_CSTRING: &[u8] = b"mufi_free_cstring\0";

/// Flags passed to the engine's init call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InitOptions {
    /// Track allocations and report leaks at teardown.
    pub leak_detection: bool,
    /// Keep allocation statistics for `print_stats`.
    pub tracking: bool,
    /// Enable the engine's runtime safety checks.
    pub safety_checks: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            leak_detection: false,
            tracking: false,
            safety_checks: true,
        }
    }
}

/// The engine's call surface.
///
/// Methods take `&mut self` because the engine is a single non-reentrant
/// global; the gateway only calls them while holding its lock.
pub trait EngineApi: Send {
    /// Allocate engine state. Returns the engine's status code (0 = ok).
    fn init(&mut self, options: &InitOptions) -> i32;

    /// Tear down engine state.
    fn deinit(&mut self);

    /// Compile and run a program. Returns the engine's status code.
    fn run(&mut self, source: &CStr) -> u8;

    /// Whether the engine's allocator reports outstanding allocations.
    fn has_leaks(&mut self) -> bool;

    /// Print allocator statistics to stdout.
    fn print_stats(&mut self);

    /// Copy a string into engine-owned memory.
    fn strdup(&mut self, value: &CStr) -> *mut c_char;

    /// Release a string allocated by the engine.
    ///
    /// # Safety
    /// `ptr` must come from `strdup` on this engine and not have been freed.
    unsafe fn free_cstring(&mut self, ptr: *mut c_char);
}

/// Engine entry points resolved from a shared library.
pub struct LibraryEngine {
    path: PathBuf,
    init: InitFn,
    deinit: DeinitFn,
    run: RunFn,
    has_leaks: HasLeaksFn,
    print_stats: PrintStatsFn,
    strdup: StrdupFn,
    free_cstring: FreeCStringFn,
    // Keeps the function pointers above valid; dropped last.
    _library: Library,
}

impl LibraryEngine {
    /// Open the library at `path` and resolve every engine symbol.
    ///
    /// Fails if the library cannot be opened or any symbol is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tracing::debug!("Loading engine library from {}", path.display());

        // Safety: loading runs the library's initializers; the engine library
        // is trusted to have none with side effects beyond its own state.
        let library = unsafe { Library::new(path.as_os_str()) }?;

        // Safety: the symbol types match the engine's exported C signatures.
        // The copied fn pointers live as long as `_library`.
        let init = unsafe { *library.get::<InitFn>(SYM_INIT)? };
        let deinit = unsafe { *library.get::<DeinitFn>(SYM_DEINIT)? };
        let run = unsafe { *library.get::<RunFn>(SYM_RUN)? };
        let has_leaks = unsafe { *library.get::<HasLeaksFn>(SYM_HAS_LEAKS)? };
        let print_stats = unsafe { *library.get::<PrintStatsFn>(SYM_PRINT_STATS)? };
        let strdup = unsafe { *library.get::<StrdupFn>(SYM_STRDUP)? };
        let free_cstring = unsafe { *library.get::<FreeCStringFn>(SYM_FREE_CSTRING)? };

        Ok(Self {
            path,
            init,
            deinit,
            run,
            has_leaks,
            print_stats,
            strdup,
            free_cstring,
            _library: library,
        })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EngineApi for LibraryEngine {
    fn init(&mut self, options: &InitOptions) -> i32 {
        unsafe {
            (self.init)(
                options.leak_detection,
                options.tracking,
                options.safety_checks,
            )
        }
    }

    fn deinit(&mut self) {
        unsafe { (self.deinit)() }
    }

    fn run(&mut self, source: &CStr) -> u8 {
        unsafe { (self.run)(source.as_ptr()) }
    }

    fn has_leaks(&mut self) -> bool {
        unsafe { (self.has_leaks)() }
    }

    fn print_stats(&mut self) {
        unsafe { (self.print_stats)() }
    }

    fn strdup(&mut self, value: &CStr) -> *mut c_char {
        unsafe { (self.strdup)(value.as_ptr()) }
    }

    unsafe fn free_cstring(&mut self, ptr: *mut c_char) {
        unsafe { (self.free_cstring)(ptr) }
    }
}
