//! IPC bridge: stdin command reader and stdout event emitter.
//!
//! stdout carries only protocol JSON lines; all logging goes to stderr.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{UiCommand, UiEvent};

/// Emit a `UiEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &UiEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("failed to serialize event: {e}");
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Ignore write/flush errors — the shell may have closed the pipe.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

/// Convenience helper for emitting error events.
pub fn emit_error(message: &str) {
    emit_event(&UiEvent::Error {
        message: message.to_string(),
    });
}

/// Read commands off stdin on a blocking thread and forward each parsed
/// [`UiCommand`] through the returned channel.
///
/// The thread exits when stdin closes (the shell is gone) or the receiver
/// is dropped.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<UiCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let text = match line {
                Ok(text) => text,
                Err(e) => {
                    error!("stdin read error: {e}");
                    break;
                }
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<UiCommand>(trimmed) {
                Ok(cmd) => {
                    debug!(?cmd, "command received");
                    if tx.send(cmd).is_err() {
                        break; // nobody left to handle commands
                    }
                }
                Err(e) => {
                    error!("invalid command line: {e} — input: {trimmed}");
                    emit_error(&format!("invalid command: {e}"));
                }
            }
        }
        debug!("stdin reader finished");
    });

    rx
}
