//! Interactive session command.
//!
//! Terminal lines go to the engine's stdin; everything the engine prints is
//! streamed back as it arrives. Ends on end of input, Ctrl-C, or engine exit.

use std::io::BufRead;
use std::process::ExitCode;
use std::thread;

use mufi_bridge::{BridgeConfig, ReplSession, SessionEvent};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;

use crate::colors;

/// Run an interactive session until the user or the engine ends it.
pub async fn execute(config: &BridgeConfig) -> anyhow::Result<ExitCode> {
    let session = ReplSession::from_config(config);
    let mut events = session.subscribe();
    session.start()?;

    eprintln!(
        "{}Mufi session started{} {}(Ctrl-D to exit){}",
        colors::BOLD,
        colors::RESET,
        colors::DIM,
        colors::RESET
    );

    let mut lines = spawn_line_reader();
    let mut exited = None;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Output(text)) => print_chunk(&text),
                Ok(SessionEvent::Exited(code)) => {
                    exited = Some(code);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Terminal fell behind, {} output chunks dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.recv() => match line {
                Some(line) => session.send(&line).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        }
    }

    session.stop().await;

    // Whatever arrived between the last poll and the stop.
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Output(text)) => print_chunk(&text),
            Ok(SessionEvent::Exited(_)) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    Ok(match exited {
        Some(Some(code)) => crate::exit_code(code),
        Some(None) => ExitCode::FAILURE,
        None => ExitCode::SUCCESS,
    })
}

fn print_chunk(text: &str) {
    print!("{}", text);
    colors::flush_stdout();
}

/// Read terminal lines on a plain thread; the channel closes at end of input.
fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    let spawned = thread::Builder::new()
        .name("mufi-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });

    if let Err(e) = spawned {
        tracing::warn!("Failed to start input reader: {}", e);
    }
    rx
}
