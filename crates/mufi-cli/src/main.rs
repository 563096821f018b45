//! Mufi CLI - run Mufi programs through the execution bridge.

mod colors;
mod diagnostics;
mod repl;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mufi_bridge::BridgeConfig;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "mufi")]
#[command(about = "Run Mufi programs embedded or in an engine process")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/mufi/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Engine executable, overriding configuration and MUFI_EXECUTABLE
    #[arg(long, global = true)]
    executable: Option<PathBuf>,

    /// Engine shared library, overriding configuration and MUFI_LIBRARY
    #[arg(long, global = true)]
    library: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program file
    Run {
        /// Path to the program
        file: PathBuf,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Run a program given on the command line
    Eval {
        /// Program source
        code: String,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Start an interactive engine session
    Repl,

    /// Show which engine executable and library would be used
    Which,

    /// Print the embedded engine's allocator statistics
    Stats,
}

#[derive(Args)]
struct ExecArgs {
    /// Where the program runs
    #[arg(long, value_enum, default_value_t = Mode::Embedded)]
    mode: Mode,

    /// Give up after this many milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print a JSON report instead of the program's output
    #[arg(long)]
    json: bool,
}

/// Execution path for `run` and `eval`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    /// In this process, through the engine library
    Embedded,
    /// In a fresh engine process
    Process,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            report(anyhow::Error::new(e).context("failed to start async runtime"));
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(dispatch(cli));

    // An embedded call abandoned on timeout may still occupy a blocking thread.
    runtime.shutdown_background();

    match result {
        Ok(code) => code,
        Err(err) => {
            report(err);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    if let Some(executable) = cli.executable {
        config.executable = Some(executable);
    }
    if let Some(library) = cli.library {
        config.library = Some(library);
    }

    match cli.command {
        Commands::Run { file, exec } => {
            run::execute(&config, run::Program::File(file), &exec).await
        }
        Commands::Eval { code, exec } => {
            run::execute(&config, run::Program::Inline(code), &exec).await
        }
        Commands::Repl => repl::execute(&config).await,
        Commands::Which => diagnostics::which(&config),
        Commands::Stats => diagnostics::stats(&config),
    }
}

/// Print a top-level failure, with a recovery hint for bridge errors.
fn report(err: anyhow::Error) {
    let message = match err.downcast_ref::<mufi_bridge::Error>() {
        Some(bridge_err) => bridge_err.with_hint(),
        None => format!("{:#}", err),
    };
    eprintln!("{}error:{} {}", colors::RED, colors::RESET, message);
}

/// Process exit code for an engine status or child exit code.
fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}
