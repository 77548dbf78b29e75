//! Reply playback through rodio.
//!
//! `OutputStream` is not `Send`, so each playback runs on its own thread
//! that owns the stream for its whole lifetime. Control flows through the
//! `Arc<Sink>` handed back over a channel; completion is reported on the
//! oneshot supplied by the caller.

use std::sync::mpsc;
use std::sync::Arc;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::oneshot;
use tracing::debug;

use super::decode::DecodedAudio;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error("could not open audio output: {0}")]
    Output(String),

    #[error("could not create playback sink: {0}")]
    Sink(String),
}

/// Seam over audio output so pipeline tests can run without a sound card.
pub trait PlaybackEngine: Send {
    /// Start playing `audio`, replacing any current playback. `done` fires
    /// once the sink drains.
    fn start(
        &mut self,
        audio: DecodedAudio,
        volume: f32,
        done: oneshot::Sender<()>,
    ) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    fn resume(&mut self);

    fn stop(&mut self);

    fn set_volume(&mut self, volume: f32);
}

/// The real rodio-backed player.
#[derive(Default)]
pub struct RodioPlayer {
    sink: Option<Arc<Sink>>,
}

impl RodioPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackEngine for RodioPlayer {
    fn start(
        &mut self,
        audio: DecodedAudio,
        volume: f32,
        done: oneshot::Sender<()>,
    ) -> Result<(), PlaybackError> {
        self.stop();

        let (ready_tx, ready_rx) = mpsc::channel();
        std::thread::spawn(move || {
            // The stream must outlive the sink, so both live on this thread.
            let (_stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(PlaybackError::Output(e.to_string())));
                    return;
                }
            };
            let sink = match Sink::try_new(&handle) {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(PlaybackError::Sink(e.to_string())));
                    return;
                }
            };
            let sink = Arc::new(sink);
            sink.set_volume(volume.clamp(0.0, 1.0));
            sink.append(SamplesBuffer::new(
                1,
                audio.sample_rate,
                audio.samples,
            ));
            let _ = ready_tx.send(Ok(Arc::clone(&sink)));

            // Blocks until the sink drains or is stopped.
            sink.sleep_until_end();
            let _ = done.send(());
            debug!("playback thread finished");
        });

        match ready_rx.recv() {
            Ok(Ok(sink)) => {
                self.sink = Some(sink);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::Output("playback thread exited".into())),
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn set_volume(&mut self, volume: f32) {
        if let Some(sink) = &self.sink {
            sink.set_volume(volume.clamp(0.0, 1.0));
        }
    }
}
