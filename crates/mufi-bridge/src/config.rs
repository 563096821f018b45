//! Bridge configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, a JSON file
//! (`<config dir>/mufi/config.json` unless a path is given), then the
//! `MUFI_EXECUTABLE` / `MUFI_LIBRARY` environment variables. Callers such as
//! the CLI apply their own flags on top.
//!
//! ```json
//! {
//!   "executable": "/opt/mufi/bin/mufiz",
//!   "search_dirs": ["/srv/mufi/bin"],
//!   "init": { "leak_detection": true },
//!   "timeout_ms": 5000
//! }
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::InitOptions;
use crate::error::{Error, Result};
use crate::process::{DEFAULT_EXECUTABLE_NAME, DEFAULT_LIBRARY_NAME};

/// Environment variable naming the engine executable.
pub const EXECUTABLE_ENV: &str = "MUFI_EXECUTABLE";

/// Environment variable naming the engine shared library.
pub const LIBRARY_ENV: &str = "MUFI_LIBRARY";

/// Settings shared by the embedded gateway and the process paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Engine executable to use instead of searching.
    pub executable: Option<PathBuf>,
    /// Executable name searched on `PATH` and in install locations.
    pub executable_name: String,
    /// Extra directories searched before the conventional ones.
    pub search_dirs: Vec<PathBuf>,
    /// Engine shared library to use instead of searching.
    pub library: Option<PathBuf>,
    /// Library name before platform decoration.
    pub library_name: String,
    /// Flags for the embedded engine's init call.
    pub init: InitOptions,
    /// Default execution timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// How long a stopping session may exit on its own before it is killed.
    pub shutdown_grace_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            executable: None,
            executable_name: DEFAULT_EXECUTABLE_NAME.to_string(),
            search_dirs: Vec::new(),
            library: None,
            library_name: DEFAULT_LIBRARY_NAME.to_string(),
            init: InitOptions::default(),
            timeout_ms: None,
            shutdown_grace_ms: 500,
        }
    }
}

impl BridgeConfig {
    /// Location of the per-user configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mufi").join("config.json"))
    }

    /// Parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Load from `explicit` (which must exist) or the default file when
    /// present, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|path| path.is_file()) {
                Some(path) => {
                    tracing::debug!("Using configuration {}", path.display());
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var_os(key));
        Ok(config)
    }

    /// Apply `MUFI_EXECUTABLE` / `MUFI_LIBRARY` from `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<OsString>) {
        if let Some(path) = lookup(EXECUTABLE_ENV).filter(|v| !v.is_empty()) {
            self.executable = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(LIBRARY_ENV).filter(|v| !v.is_empty()) {
            self.library = Some(PathBuf::from(path));
        }
    }

    /// Default execution timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Grace window for session shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
