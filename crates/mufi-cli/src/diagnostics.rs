//! `which` and `stats`: where the engine lives and what its allocator reports.

use std::process::ExitCode;

use mufi_bridge::{BridgeConfig, Error, ExecutableLocator, InitOptions, LibraryLocator};

use crate::colors;
use crate::run::load_engine;

/// Print the engine executable and library the bridge would use.
///
/// Fails when no executable can be found; a missing library is only reported.
pub fn which(config: &BridgeConfig) -> anyhow::Result<ExitCode> {
    let executables = ExecutableLocator::from_config(config);
    let executable = executables.find();
    let libraries = LibraryLocator::from_config(config);
    let library = libraries.find();

    match &executable {
        Some(path) => println!("executable: {}", path.display()),
        None => println!(
            "executable: {}not found{} ({})",
            colors::YELLOW,
            colors::RESET,
            executables.name()
        ),
    }
    match &library {
        Some(path) => println!("library:    {}", path.display()),
        None => println!(
            "library:    {}not found{} ({})",
            colors::YELLOW,
            colors::RESET,
            libraries.file_name().to_string_lossy()
        ),
    }

    if executable.is_none() {
        return Err(Error::ExecutableNotFound.into());
    }
    Ok(ExitCode::SUCCESS)
}

/// Initialize the embedded engine with tracking on and print its statistics.
pub fn stats(config: &BridgeConfig) -> anyhow::Result<ExitCode> {
    let init = InitOptions {
        tracking: true,
        ..config.init
    };
    let engine = load_engine(config, &init)?;

    let text = engine.print_stats()?;
    print!("{}", text);
    if engine.has_leaks()? {
        println!("{}leaks: outstanding allocations{}", colors::RED, colors::RESET);
    } else {
        println!("{}leaks: none{}", colors::GREEN, colors::RESET);
    }

    engine.deinitialize();
    Ok(ExitCode::SUCCESS)
}
