//! One-shot execution of a program in a fresh engine process.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};

use super::RUN_FLAG;
use super::locate::ExecutableLocator;

/// Runs programs through `<exe> --run <file>`, one process per run.
///
/// Runs are independent of each other and of the embedded gateway. A timeout
/// kills the child, which is a complete cancellation.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    locator: ExecutableLocator,
}

impl ProcessRunner {
    /// Runner using `locator` to find the engine executable.
    pub fn new(locator: ExecutableLocator) -> Self {
        Self { locator }
    }

    /// Runner configured from a `BridgeConfig`.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(ExecutableLocator::from_config(config))
    }

    /// First usable engine executable in search order.
    pub fn find_executable(&self) -> Option<PathBuf> {
        self.locator.find()
    }

    /// Run `code` from a temporary file, which is removed afterwards.
    pub async fn run(&self, code: &str, timeout: Option<Duration>) -> Result<String> {
        let executable = self.find_executable().ok_or(Error::ExecutableNotFound)?;

        let mut script = tempfile::Builder::new()
            .prefix("mufi-run-")
            .suffix(".mufi")
            .tempfile()?;
        script.write_all(code.as_bytes())?;
        script.flush()?;

        let result = run_with(&executable, script.path(), timeout).await;

        if let Err(e) = script.close() {
            tracing::warn!("Failed to remove temporary program: {}", e);
        }
        result
    }

    /// Run the program at `path`.
    ///
    /// Returns stdout (plus stderr, when non-empty) on exit code 0, and
    /// `Error::ProcessFailed` with both streams otherwise.
    pub async fn run_file(&self, path: &Path, timeout: Option<Duration>) -> Result<String> {
        let executable = self.find_executable().ok_or(Error::ExecutableNotFound)?;
        run_with(&executable, path, timeout).await
    }
}

async fn run_with(executable: &Path, script: &Path, timeout: Option<Duration>) -> Result<String> {
    tracing::debug!(
        "Running {} {} {}",
        executable.display(),
        RUN_FLAG,
        script.display()
    );

    let child = Command::new(executable)
        .arg(RUN_FLAG)
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::ProcessSpawnFailed)?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!("Engine process exceeded {:?}, killed", limit);
                return Err(Error::TimedOut(limit));
            }
        },
        None => child.wait_with_output().await?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(combine_output(stdout, &stderr))
    } else {
        let exit_code = exit_code(output.status);
        tracing::debug!(exit_code, "Engine process failed");
        Err(Error::ProcessFailed {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Exit code, or `128 + signal` for a child killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// Stdout followed by stderr when stderr has anything, on its own line.
fn combine_output(mut stdout: String, stderr: &str) -> String {
    if stderr.is_empty() {
        return stdout;
    }
    if !stdout.is_empty() && !stdout.ends_with('\n') {
        stdout.push('\n');
    }
    stdout.push_str(stderr);
    stdout
}
