//! Run and eval command implementation.
//!
//! Executes one program either inside this process (through the engine
//! library) or in a fresh engine process, and mirrors its status as the exit code.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use mufi_bridge::{BridgeConfig, EmbeddedEngine, Error, InitOptions, ProcessRunner, RejectReason};
use serde::Serialize;

use crate::{ExecArgs, Mode, colors};

/// Where the program text comes from.
pub enum Program {
    File(PathBuf),
    Inline(String),
}

/// Outcome of one run, as printed by `--json`.
#[derive(Debug, Serialize)]
struct RunReport {
    mode: Mode,
    exit_code: i32,
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    elapsed_ms: u64,
}

/// Run a program and print its output (or a JSON report).
pub async fn execute(
    config: &BridgeConfig,
    program: Program,
    exec: &ExecArgs,
) -> anyhow::Result<ExitCode> {
    if let Program::File(path) = &program {
        if !path.is_file() {
            anyhow::bail!("Program not found: {}", path.display());
        }
    }

    let timeout = exec.timeout.map(Duration::from_millis).or(config.timeout());
    let report = match exec.mode {
        Mode::Embedded => run_embedded(config, program, timeout).await?,
        Mode::Process => run_process(config, program, timeout).await?,
    };

    if exec.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.output);
        colors::flush_stdout();
        if let Some(stderr) = &report.stderr {
            eprint!("{}", stderr);
        }
        eprintln!("{}", trailer(&report));
    }

    Ok(crate::exit_code(report.exit_code))
}

/// Locate, load and initialize the engine library.
pub fn load_engine(config: &BridgeConfig, init: &InitOptions) -> mufi_bridge::Result<EmbeddedEngine> {
    let engine = EmbeddedEngine::from_config(config)?;
    engine.initialize(init)?;
    Ok(engine)
}

async fn run_embedded(
    config: &BridgeConfig,
    program: Program,
    timeout: Option<Duration>,
) -> anyhow::Result<RunReport> {
    let source = match program {
        Program::File(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            String::from_utf8(bytes)
                .map_err(|_| Error::InputRejected(RejectReason::InvalidEncoding))?
        }
        Program::Inline(code) => code,
    };

    let engine = load_engine(config, &config.init)?;
    let result = engine.interpret_timeout(source, timeout).await?;

    Ok(RunReport {
        mode: Mode::Embedded,
        exit_code: i32::from(result.status),
        output: result.output,
        stderr: None,
        elapsed_ms: millis(result.elapsed),
    })
}

async fn run_process(
    config: &BridgeConfig,
    program: Program,
    timeout: Option<Duration>,
) -> anyhow::Result<RunReport> {
    let runner = ProcessRunner::from_config(config);
    let start = Instant::now();
    let outcome = match &program {
        Program::File(path) => runner.run_file(path, timeout).await,
        Program::Inline(code) => runner.run(code, timeout).await,
    };
    let elapsed_ms = millis(start.elapsed());

    match outcome {
        Ok(output) => Ok(RunReport {
            mode: Mode::Process,
            exit_code: 0,
            output,
            stderr: None,
            elapsed_ms,
        }),
        Err(Error::ProcessFailed {
            exit_code,
            stdout,
            stderr,
        }) => Ok(RunReport {
            mode: Mode::Process,
            exit_code,
            output: stdout,
            stderr: Some(stderr),
            elapsed_ms,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Dim status line printed to stderr after the program's own output.
fn trailer(report: &RunReport) -> String {
    let status = if report.exit_code == 0 {
        "finished".to_string()
    } else {
        format!("exited with code {}", report.exit_code)
    };
    format!(
        "{}{} in {} ms{}",
        colors::DIM,
        status,
        report.elapsed_ms,
        colors::RESET
    )
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_shape() {
        let report = RunReport {
            mode: Mode::Process,
            exit_code: 0,
            output: "hi\n".to_string(),
            stderr: None,
            elapsed_ms: 12,
        };
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();

        assert_eq!(json["mode"], "process");
        assert_eq!(json["output"], "hi\n");
        assert!(json.get("stderr").is_none());
    }

    #[test]
    fn test_trailer_shows_elapsed_time() {
        let mut report = RunReport {
            mode: Mode::Embedded,
            exit_code: 0,
            output: String::new(),
            stderr: None,
            elapsed_ms: 42,
        };
        assert!(trailer(&report).contains("finished in 42 ms"));

        report.exit_code = 3;
        assert!(trailer(&report).contains("exited with code 3 in 42 ms"));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
