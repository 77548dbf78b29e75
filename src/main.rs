//! Sleeptalk core — native voice client for the relaxation assistant.
//!
//! Talks to the desktop shell over JSON-line IPC on stdin/stdout and to
//! the conversation backend over HTTP. This entry point wires the
//! subsystems together and runs the select loop that owns the pipeline.

mod audio;
mod backend;
mod config;
mod conversation;
mod ipc;
mod pipeline;
mod session;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use audio::capture::CpalCapture;
use audio::playback::RodioPlayer;
use backend::HttpBackend;
use config::read_settings;
use ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use ipc::UiEvent;
use pipeline::{Pipeline, TICK_INTERVAL};
use session::SessionStore;

#[tokio::main]
async fn main() {
    // Log to stderr; stdout is reserved for the IPC stream.
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .init();

    // First event out the door tells the shell the process came up.
    emit_event(&UiEvent::Starting {});

    emit_event(&UiEvent::Loading {
        step: "Loading settings...".to_string(),
    });
    let settings = read_settings();
    info!(?settings, "configuration loaded");

    let session = SessionStore::load(config::session_path());

    emit_event(&UiEvent::Loading {
        step: "Connecting to backend...".to_string(),
    });
    let backend = match HttpBackend::new(
        &settings.backend_url,
        Duration::from_secs(settings.request_timeout_secs),
    ) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!("could not build the backend client: {e:#}");
            emit_error(&format!("backend client failed: {e:#}"));
            return;
        }
    };

    emit_event(&UiEvent::Loading {
        step: "Starting command bridge...".to_string(),
    });
    let mut cmd_rx = spawn_stdin_reader();

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let mut pipeline = Pipeline::new(
        settings,
        CpalCapture,
        backend,
        RodioPlayer::new(),
        session,
        msg_tx,
    );

    emit_event(&UiEvent::Ready {});
    info!("sleeptalk core ready");
    pipeline.announce();

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Main loop: shell commands, stage completions, housekeeping ticks.
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !pipeline.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed; shell is gone");
                        pipeline.shutdown();
                        break;
                    }
                }
            }
            msg = msg_rx.recv() => {
                if let Some(msg) = msg {
                    pipeline.handle_msg(msg);
                }
            }
            _ = ticker.tick() => {
                pipeline.tick();
            }
        }
    }

    info!("sleeptalk core shutting down");
}
