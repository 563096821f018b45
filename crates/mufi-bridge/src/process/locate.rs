//! Finding the engine executable and shared library on disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::BridgeConfig;

/// Default engine executable name.
pub const DEFAULT_EXECUTABLE_NAME: &str = "mufiz";

/// Default engine library name, before platform decoration (`libmufiz.so` etc.).
pub const DEFAULT_LIBRARY_NAME: &str = "mufiz";

/// Locates the engine executable.
///
/// Search order:
/// 1. An explicit path, when configured
/// 2. Each directory in `PATH`
/// 3. Conventional install locations
/// 4. Development paths relative to the current directory
#[derive(Debug, Clone)]
pub struct ExecutableLocator {
    explicit: Option<PathBuf>,
    name: String,
    search_path: Option<OsString>,
    common_dirs: Vec<PathBuf>,
    dev_paths: Vec<PathBuf>,
}

impl ExecutableLocator {
    /// Search for `name` using the process's `PATH` and the default locations.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            explicit: None,
            search_path: std::env::var_os("PATH"),
            common_dirs: default_bin_dirs(),
            dev_paths: default_dev_paths(&name),
            name,
        }
    }

    /// Locator described by a configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut locator = Self::new(config.executable_name.clone());
        locator.explicit = config.executable.clone();
        locator.common_dirs = prepend(&config.search_dirs, locator.common_dirs);
        locator
    }

    /// Check this path before searching.
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Replace the `PATH` value searched in step 2.
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Replace the conventional install directories.
    pub fn with_common_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.common_dirs = dirs;
        self
    }

    /// Replace the development paths (full paths to candidate executables).
    pub fn with_dev_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.dev_paths = paths;
        self
    }

    /// Executable name searched for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First executable match in search order, if any.
    pub fn find(&self) -> Option<PathBuf> {
        if let Some(explicit) = &self.explicit {
            if is_executable(explicit) {
                return Some(explicit.clone());
            }
            tracing::warn!(
                "Configured engine executable {} is not executable, searching instead",
                explicit.display()
            );
        }

        if let Some(search_path) = &self.search_path {
            if let Ok(path) = which::which_in(&self.name, Some(search_path), ".") {
                return Some(path);
            }
        }

        self.common_dirs
            .iter()
            .map(|dir| dir.join(&self.name))
            .chain(self.dev_paths.iter().cloned())
            .find(|candidate| is_executable(candidate))
    }
}

/// Locates the engine shared library.
#[derive(Debug, Clone)]
pub struct LibraryLocator {
    explicit: Option<PathBuf>,
    file_name: OsString,
    dirs: Vec<PathBuf>,
}

impl LibraryLocator {
    /// Search for the platform file name of `name` in the default directories.
    pub fn new(name: &str) -> Self {
        Self {
            explicit: None,
            file_name: libloading::library_filename(name),
            dirs: default_lib_dirs(),
        }
    }

    /// Locator described by a configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut locator = Self::new(&config.library_name);
        locator.explicit = config.library.clone();
        locator.dirs = prepend(&config.search_dirs, locator.dirs);
        locator
    }

    /// Replace the searched directories.
    pub fn with_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.dirs = dirs;
        self
    }

    /// Platform-specific file name searched for.
    pub fn file_name(&self) -> &OsString {
        &self.file_name
    }

    /// The explicit path if set, else the first directory holding the library.
    pub fn find(&self) -> Option<PathBuf> {
        if let Some(explicit) = &self.explicit {
            return explicit.is_file().then(|| explicit.clone());
        }

        self.dirs
            .iter()
            .map(|dir| dir.join(&self.file_name))
            .find(|candidate| candidate.is_file())
    }
}

fn prepend(first: &[PathBuf], rest: Vec<PathBuf>) -> Vec<PathBuf> {
    first.iter().cloned().chain(rest).collect()
}

fn home_dirs(suffix: &str) -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| vec![home.join(".local").join(suffix), home.join(".mufi").join(suffix)])
        .unwrap_or_default()
}

/// Conventional install directories for the executable.
pub fn default_bin_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/opt/mufi/bin"),
    ];
    dirs.extend(home_dirs("bin"));
    dirs
}

/// Conventional install directories for the shared library, then dev paths.
pub fn default_lib_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/local/lib"),
        PathBuf::from("/usr/lib"),
        PathBuf::from("/opt/homebrew/lib"),
        PathBuf::from("/opt/mufi/lib"),
    ];
    dirs.extend(home_dirs("lib"));
    dirs.extend([PathBuf::from("lib"), PathBuf::from("build/lib")]);
    dirs
}

/// Paths relative to the current directory used during development.
pub fn default_dev_paths(name: &str) -> Vec<PathBuf> {
    ["bin", "build/bin", "target/release", "."]
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .collect()
}

/// Whether `path` is a regular file with an execute bit set.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
