//! Voice turn pipeline: Mic -> upload -> chat -> reply audio -> speaker.
//!
//! Owns the control state machine and every side effect around it. Network
//! stages run as spawned tasks that report back through [`PipelineMsg`];
//! each message carries the generation it belongs to, so anything from an
//! abandoned turn is dropped on arrival.

pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::audio::capture::{list_input_devices, ActiveCapture, CaptureEngine};
use crate::audio::decode::DecodedAudio;
use crate::audio::format::upload_file_name;
use crate::audio::playback::PlaybackEngine;
use crate::audio::TARGET_SAMPLE_RATE;
use crate::backend::{BackendError, ChatBackend, ChatReply, Transcription, UploadAudio};
use crate::config::Settings;
use crate::conversation::{ConversationLog, EntryId, Role};
use crate::ipc::{emit_event, UiCommand, UiEvent};
use crate::session::SessionStore;

use state::{next_state, ControlState, Trigger};

// ── Constants ───────────────────────────────────────────────────────

/// Cadence of the housekeeping tick (ring drain, watchdogs).
pub const TICK_INTERVAL: Duration = Duration::from_millis(40);

/// Hard ceiling on one recording.
const MAX_RECORDING: Duration = Duration::from_secs(60);

/// Sample-count twin of [`MAX_RECORDING`]; also caps buffer growth.
const MAX_RECORDING_SAMPLES: usize =
    MAX_RECORDING.as_secs() as usize * TARGET_SAMPLE_RATE as usize;

/// Recordings shorter than this (500 ms) are discarded without upload.
const MIN_RECORDING_SAMPLES: usize = TARGET_SAMPLE_RATE as usize / 2;

/// How long a notice stays on screen.
const NOTICE_TTL: Duration = Duration::from_secs(4);

/// Assistant entry shown while the reply is being generated.
const THINKING_PLACEHOLDER: &str = "...";

/// Replaces the placeholder when the chat round trip fails.
const PROCESS_APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

/// Canned prompts behind the quick-action chips.
const QUICK_ACTIONS: &[(&str, &str)] = &[
    (
        "meditation",
        "Please guide me through a short meditation session.",
    ),
    ("story", "Can you tell me a relaxing bedtime story?"),
    ("breathing", "Let us do some breathing exercises together."),
];

// ── Pipeline messages ───────────────────────────────────────────────

/// Completion reports from spawned turn stages.
#[derive(Debug)]
pub enum PipelineMsg {
    TranscribeDone {
        generation: u64,
        result: Result<Transcription, BackendError>,
    },
    ProcessDone {
        generation: u64,
        result: Result<ChatReply, BackendError>,
    },
    AudioLoaded {
        generation: u64,
        result: Result<DecodedAudio, BackendError>,
    },
    PlaybackFinished {
        generation: u64,
    },
}

impl PipelineMsg {
    fn generation(&self) -> u64 {
        match self {
            PipelineMsg::TranscribeDone { generation, .. }
            | PipelineMsg::ProcessDone { generation, .. }
            | PipelineMsg::AudioLoaded { generation, .. }
            | PipelineMsg::PlaybackFinished { generation } => *generation,
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// The running voice pipeline. Single-threaded at heart: commands, stage
/// completions and ticks all funnel through the owner's select loop.
pub struct Pipeline<C, B, P> {
    state: ControlState,
    /// Bumped whenever a new turn begins; stale stage results are dropped.
    generation: u64,
    settings: Settings,
    capture: C,
    backend: Arc<B>,
    player: P,
    session: SessionStore,
    conversation: ConversationLog,
    msg_tx: mpsc::UnboundedSender<PipelineMsg>,
    active: Option<ActiveCapture>,
    recording_buf: Vec<f32>,
    recording_started: Option<Instant>,
    /// Assistant entry to rewrite once the reply text arrives.
    placeholder: Option<EntryId>,
    /// Decoded reply audio staged while autoplay is off.
    pending_audio: Option<DecodedAudio>,
    notice_expires: Option<Instant>,
    volume: f32,
}

impl<C, B, P> Pipeline<C, B, P>
where
    C: CaptureEngine,
    B: ChatBackend + 'static,
    P: PlaybackEngine,
{
    pub fn new(
        settings: Settings,
        capture: C,
        backend: Arc<B>,
        player: P,
        session: SessionStore,
        msg_tx: mpsc::UnboundedSender<PipelineMsg>,
    ) -> Self {
        let volume = settings.playback_volume.clamp(0.0, 1.0);
        Self {
            state: ControlState::Idle,
            generation: 0,
            settings,
            capture,
            backend,
            player,
            session,
            conversation: ConversationLog::new(),
            msg_tx,
            active: None,
            recording_buf: Vec::new(),
            recording_started: None,
            placeholder: None,
            pending_audio: None,
            notice_expires: None,
            volume,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn conversation(&self) -> &ConversationLog {
        &self.conversation
    }

    /// Push the initial state to a freshly attached shell.
    pub fn announce(&self) {
        self.emit_session();
        emit_event(&UiEvent::StateChange {
            state: self.state.name().to_string(),
        });
        emit_event(&UiEvent::Status {
            text: self.state.status_line().to_string(),
        });
    }

    /// Handle one command from the shell. Returns `false` on shutdown.
    pub fn handle_command(&mut self, cmd: UiCommand) -> bool {
        match cmd {
            UiCommand::Toggle {} => self.on_toggle(),
            UiCommand::QuickAction { action } => self.on_quick_action(&action),
            UiCommand::SetVolume { volume } => {
                self.volume = volume.clamp(0.0, 1.0);
                self.player.set_volume(self.volume);
            }
            UiCommand::ListAudioDevices {} => {
                emit_event(&UiEvent::AudioDevices {
                    input: list_input_devices(),
                });
            }
            UiCommand::Ping {} => emit_event(&UiEvent::Pong {}),
            UiCommand::Stop {} => {
                info!("stop command received");
                emit_event(&UiEvent::Stopping {});
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Handle a stage completion, dropping anything from an older turn.
    pub fn handle_msg(&mut self, msg: PipelineMsg) {
        if msg.generation() != self.generation {
            debug!(
                generation = msg.generation(),
                current = self.generation,
                "dropping stale pipeline message"
            );
            return;
        }
        match msg {
            PipelineMsg::TranscribeDone { result, .. } => self.on_transcribed(result),
            PipelineMsg::ProcessDone { result, .. } => self.on_reply(result),
            PipelineMsg::AudioLoaded { result, .. } => self.on_audio_loaded(result),
            PipelineMsg::PlaybackFinished { .. } => self.on_playback_finished(),
        }
    }

    /// Periodic housekeeping: drain the capture ring, enforce the
    /// recording ceiling, expire notices.
    pub fn tick(&mut self) {
        if self.state == ControlState::Recording {
            if let Some(active) = self.active.as_mut() {
                active.drain_into(&mut self.recording_buf);
            }
            let over_time = self
                .recording_started
                .map(|t| t.elapsed() >= MAX_RECORDING)
                .unwrap_or(false);
            if over_time || self.recording_buf.len() >= MAX_RECORDING_SAMPLES {
                info!("recording ceiling reached, stopping");
                self.finish_recording(true);
            }
        }

        if let Some(expires) = self.notice_expires {
            if Instant::now() >= expires {
                self.notice_expires = None;
                emit_event(&UiEvent::NoticeCleared {});
                self.apply(Trigger::NoticeExpired);
            }
        }
    }

    /// Drop the capture stream and stop any playback.
    pub fn shutdown(&mut self) {
        self.active = None;
        self.player.stop();
    }

    // ── State machine ───────────────────────────────────────────────

    fn apply(&mut self, trigger: Trigger) -> bool {
        let Some(next) = next_state(self.state, trigger) else {
            debug!(state = %self.state, ?trigger, "trigger ignored");
            return false;
        };
        if next == self.state {
            return false;
        }
        info!(from = %self.state, to = %next, ?trigger, "state change");
        self.state = next;
        emit_event(&UiEvent::StateChange {
            state: next.name().to_string(),
        });
        emit_event(&UiEvent::Status {
            text: next.status_line().to_string(),
        });
        true
    }

    // ── Voice button ────────────────────────────────────────────────

    fn on_toggle(&mut self) {
        match self.state {
            ControlState::Idle | ControlState::Error => self.begin_recording(),
            ControlState::Recording => self.finish_recording(false),
            ControlState::Processing => {
                debug!("toggle ignored while processing");
            }
            ControlState::Play => self.start_pending_playback(),
            ControlState::Playing => {
                self.player.pause();
                self.apply(Trigger::Toggle);
            }
            ControlState::Paused => {
                self.player.resume();
                self.apply(Trigger::Toggle);
            }
        }
    }

    fn begin_recording(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.clear_notice();
        self.pending_audio = None;

        match self.capture.begin(self.settings.input_device.as_deref()) {
            Ok(active) => {
                self.recording_buf.clear();
                self.recording_started = Some(Instant::now());
                self.active = Some(active);
                emit_event(&UiEvent::RecordingStart {});
                self.apply(Trigger::CaptureStarted);
            }
            Err(e) => {
                warn!("could not open capture: {e}");
                self.apply(Trigger::CaptureFailed);
                self.show_notice(e.notice(), "error");
            }
        }
    }

    /// Stop capture and either discard the take or hand it to the
    /// transcription stage. `forced` marks the duration-ceiling path.
    fn finish_recording(&mut self, forced: bool) {
        let Some(active) = self.active.take() else {
            warn!("finish_recording without an active capture");
            return;
        };
        let format = active.format();
        let sample_rate = active.sample_rate();

        self.apply(Trigger::Toggle);
        emit_event(&UiEvent::RecordingStop {});
        self.recording_started = None;
        if forced {
            self.show_notice("Maximum recording duration reached", "info");
        }

        let mut samples = std::mem::take(&mut self.recording_buf);
        active.finish(&mut samples);

        if samples.is_empty() {
            info!("discarding empty recording");
            self.apply(Trigger::RecordingRejected);
            self.show_notice("No audio was captured. Please try again.", "error");
            return;
        }
        if samples.len() < MIN_RECORDING_SAMPLES {
            info!(samples = samples.len(), "discarding too-short recording");
            self.apply(Trigger::RecordingRejected);
            self.show_notice(
                "Recording too short. Please hold the button and speak.",
                "error",
            );
            return;
        }

        info!(samples = samples.len(), ?format, "recording complete");
        let upload = UploadAudio {
            bytes: format.encode(&samples, sample_rate),
            file_name: upload_file_name(format),
            mime_type: format.mime_type(),
        };
        self.spawn_transcribe(upload);
    }

    // ── Turn stages ─────────────────────────────────────────────────

    fn spawn_transcribe(&mut self, upload: UploadAudio) {
        let backend = Arc::clone(&self.backend);
        let session_id = self.session.current().map(str::to_owned);
        let tx = self.msg_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = backend.transcribe(upload, session_id).await;
            let _ = tx.send(PipelineMsg::TranscribeDone { generation, result });
        });
    }

    fn on_transcribed(&mut self, result: Result<Transcription, BackendError>) {
        match result {
            Ok(t) => {
                // Adopt (and persist) the session before the next call so a
                // crash in between still resumes the same conversation.
                if self.session.adopt(t.session_id.as_deref()) {
                    self.emit_session();
                }
                info!(chars = t.text.len(), "transcript received");
                self.conversation.append(Role::User, &t.text);
                let placeholder = self.conversation.append(Role::Assistant, THINKING_PLACEHOLDER);
                self.placeholder = Some(placeholder);
                self.conversation.scroll_to_latest();
                self.spawn_process(t.text);
            }
            Err(e) => {
                warn!("transcription failed: {e}");
                self.apply(Trigger::TurnFailed);
                self.show_notice(transcribe_notice(&e), "error");
            }
        }
    }

    fn spawn_process(&mut self, message: String) {
        let backend = Arc::clone(&self.backend);
        let session_id = self.session.current().map(str::to_owned);
        let tx = self.msg_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = backend.process(message, session_id).await;
            let _ = tx.send(PipelineMsg::ProcessDone { generation, result });
        });
    }

    fn on_reply(&mut self, result: Result<ChatReply, BackendError>) {
        match result {
            Ok(reply) => {
                if self.session.adopt(reply.session_id.as_deref()) {
                    self.emit_session();
                }
                info!(
                    chars = reply.text.len(),
                    audio = reply.audio_url.is_some(),
                    "reply received"
                );
                match self.placeholder.take() {
                    Some(id) => self.conversation.update(id, &reply.text),
                    None => {
                        self.conversation.append(Role::Assistant, &reply.text);
                    }
                }
                self.conversation.scroll_to_latest();
                match reply.audio_url {
                    Some(url) => self.spawn_audio_fetch(url),
                    None => {
                        info!("reply carried no audio");
                        self.apply(Trigger::ReplyWithoutAudio);
                    }
                }
            }
            Err(e) => {
                // The reply text is what the user is waiting on; the
                // apology replaces the thinking placeholder in place.
                warn!("message processing failed: {e}");
                if let Some(id) = self.placeholder.take() {
                    self.conversation.update(id, PROCESS_APOLOGY);
                    self.conversation.scroll_to_latest();
                }
                self.apply(Trigger::TurnFailed);
            }
        }
    }

    fn spawn_audio_fetch(&mut self, url: String) {
        let backend = Arc::clone(&self.backend);
        let tx = self.msg_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = backend.fetch_reply_audio(url).await;
            let _ = tx.send(PipelineMsg::AudioLoaded { generation, result });
        });
    }

    fn on_audio_loaded(&mut self, result: Result<DecodedAudio, BackendError>) {
        match result {
            Ok(audio) => {
                debug!(secs = audio.duration_secs(), "reply audio ready");
                if self.settings.autoplay {
                    self.start_playback(audio, Trigger::AudioReady { autoplay: true });
                } else {
                    self.pending_audio = Some(audio);
                    self.apply(Trigger::AudioReady { autoplay: false });
                }
            }
            Err(e) => {
                warn!("reply audio unavailable: {e}");
                self.apply(Trigger::PlaybackFailed);
                self.show_notice("Could not play the response audio", "error");
            }
        }
    }

    // ── Playback ────────────────────────────────────────────────────

    fn start_pending_playback(&mut self) {
        let Some(audio) = self.pending_audio.take() else {
            warn!("no reply audio staged for playback");
            self.apply(Trigger::PlaybackFailed);
            return;
        };
        self.start_playback(audio, Trigger::Toggle);
    }

    fn start_playback(&mut self, audio: DecodedAudio, via: Trigger) {
        let (done_tx, done_rx) = oneshot::channel();
        match self.player.start(audio, self.volume, done_tx) {
            Ok(()) => {
                let tx = self.msg_tx.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    // A dropped sender still ends the playing state.
                    let _ = done_rx.await;
                    let _ = tx.send(PipelineMsg::PlaybackFinished { generation });
                });
                emit_event(&UiEvent::PlaybackStart {});
                self.apply(via);
            }
            Err(e) => {
                warn!("could not start playback: {e}");
                self.apply(Trigger::PlaybackFailed);
                self.show_notice("Could not play the response audio", "error");
            }
        }
    }

    fn on_playback_finished(&mut self) {
        if !matches!(self.state, ControlState::Playing | ControlState::Paused) {
            return;
        }
        emit_event(&UiEvent::PlaybackEnd {});
        self.apply(Trigger::PlaybackFinished);
    }

    // ── Quick actions ───────────────────────────────────────────────

    fn on_quick_action(&mut self, action: &str) {
        if self.state != ControlState::Idle {
            debug!(action, state = %self.state, "quick action ignored");
            return;
        }
        let Some((_, message)) = QUICK_ACTIONS.iter().find(|(name, _)| *name == action) else {
            warn!(action, "unknown quick action");
            return;
        };

        self.generation = self.generation.wrapping_add(1);
        self.clear_notice();
        self.pending_audio = None;

        info!(action, "quick action submitted");
        self.conversation.append(Role::User, message);
        let placeholder = self.conversation.append(Role::Assistant, THINKING_PLACEHOLDER);
        self.placeholder = Some(placeholder);
        self.conversation.scroll_to_latest();

        self.apply(Trigger::MessageSubmitted);
        emit_event(&UiEvent::Status {
            text: "Processing your request...".to_string(),
        });
        self.spawn_process(message.to_string());
    }

    // ── Notices and session ─────────────────────────────────────────

    fn show_notice(&mut self, message: &str, kind: &str) {
        emit_event(&UiEvent::Notice {
            message: message.to_string(),
            kind: kind.to_string(),
        });
        self.notice_expires = Some(Instant::now() + NOTICE_TTL);
    }

    fn clear_notice(&mut self) {
        if self.notice_expires.take().is_some() {
            emit_event(&UiEvent::NoticeCleared {});
        }
    }

    fn emit_session(&self) {
        if let Some(id) = self.session.current() {
            emit_event(&UiEvent::Session { id: id.to_string() });
        }
    }

    #[cfg(test)]
    fn expire_notice_now(&mut self) {
        if self.notice_expires.is_some() {
            self.notice_expires = Some(Instant::now());
        }
    }

    #[cfg(test)]
    fn notice_pending(&self) -> bool {
        self.notice_expires.is_some()
    }
}

/// Map a transcription-stage failure to its user notice.
fn transcribe_notice(e: &BackendError) -> &'static str {
    match e {
        BackendError::Timeout => "Upload timed out. Please check your connection and try again.",
        BackendError::Transport(_) => "Could not upload your recording. Please try again.",
        _ => "Could not transcribe audio. Please try again.",
    }
}

// ── Tests ───────────────────────────────────────────────────────────
