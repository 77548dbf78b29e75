//! Control-state machine for the voice loop.
//!
//! Transitions are computed by the pure [`next_state`] table; the pipeline
//! applies them and performs the side effects. Anything the table does not
//! name is rejected, which is what makes taps during processing no-ops.

use std::fmt;

/// Where the voice loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Waiting for the user.
    Idle,
    /// Microphone open, samples accumulating.
    Recording,
    /// A turn is in flight: upload, chat round trip, audio download.
    Processing,
    /// Reply audio is ready but waiting for a tap to start (autoplay off).
    Play,
    Playing,
    Paused,
    /// A recoverable fault was surfaced; clears back to idle.
    Error,
}

impl ControlState {
    /// Wire name used in `state_change` events.
    pub fn name(&self) -> &'static str {
        match self {
            ControlState::Idle => "idle",
            ControlState::Recording => "recording",
            ControlState::Processing => "processing",
            ControlState::Play => "play",
            ControlState::Playing => "playing",
            ControlState::Paused => "paused",
            ControlState::Error => "error",
        }
    }

    /// Status line the shell shows for this state.
    pub fn status_line(&self) -> &'static str {
        match self {
            ControlState::Idle => "Ready to help you relax",
            ControlState::Recording => "Listening... Speak now",
            ControlState::Processing => "Processing your message...",
            ControlState::Play => "Response ready",
            ControlState::Playing => "Playing response...",
            ControlState::Paused => "Paused",
            ControlState::Error => "Something went wrong",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything that can move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The user tapped the voice button.
    Toggle,
    /// The capture stream opened and is running.
    CaptureStarted,
    /// The capture stream could not be opened.
    CaptureFailed,
    /// A canned quick-action message was submitted directly.
    MessageSubmitted,
    /// The recording was too short or empty; nothing was uploaded.
    RecordingRejected,
    /// Upload, transcription or chat processing failed.
    TurnFailed,
    /// The reply arrived without any audio to play.
    ReplyWithoutAudio,
    /// Reply audio decoded; `autoplay` decides whether it starts itself.
    AudioReady { autoplay: bool },
    /// The sink drained (or was stopped).
    PlaybackFinished,
    /// Output could not be opened or the sink died.
    PlaybackFailed,
    /// The error notice timed out.
    NoticeExpired,
}

/// The transition table. `None` means the trigger is ignored in that state.
pub fn next_state(state: ControlState, trigger: Trigger) -> Option<ControlState> {
    use ControlState::*;
    use Trigger::*;

    match (state, trigger) {
        // Starting a recording, from rest or while an error notice shows.
        (Idle | Error, CaptureStarted) => Some(Recording),
        (Idle | Error, CaptureFailed) => Some(Error),

        // Quick actions skip recording entirely.
        (Idle, MessageSubmitted) => Some(Processing),

        // Tapping while recording stops it and starts the turn.
        (Recording, Toggle) => Some(Processing),

        // Turn outcomes.
        (Processing, RecordingRejected | TurnFailed | ReplyWithoutAudio) => Some(Idle),
        (Processing, AudioReady { autoplay: true }) => Some(Playing),
        (Processing, AudioReady { autoplay: false }) => Some(Play),
        (Processing, PlaybackFailed) => Some(Idle),

        // Playback control.
        (Play, Toggle) => Some(Playing),
        (Play, PlaybackFailed) => Some(Idle),
        (Playing, Toggle) => Some(Paused),
        (Playing, PlaybackFinished) => Some(Idle),
        (Playing, PlaybackFailed) => Some(Idle),
        (Paused, Toggle) => Some(Playing),
        (Paused, PlaybackFinished) => Some(Idle),

        // Error notices clear back to rest.
        (Error, NoticeExpired) => Some(Idle),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ControlState::*;
    use Trigger::*;

    #[test]
    fn tap_cycle_records_then_processes() {
        assert_eq!(next_state(Idle, CaptureStarted), Some(Recording));
        assert_eq!(next_state(Recording, Toggle), Some(Processing));
    }

    #[test]
    fn taps_during_processing_are_ignored() {
        assert_eq!(next_state(Processing, Toggle), None);
    }

    #[test]
    fn successful_turn_lands_in_playing_or_play() {
        assert_eq!(
            next_state(Processing, AudioReady { autoplay: true }),
            Some(Playing)
        );
        assert_eq!(
            next_state(Processing, AudioReady { autoplay: false }),
            Some(Play)
        );
        assert_eq!(next_state(Play, Toggle), Some(Playing));
    }

    #[test]
    fn failed_turns_return_to_idle() {
        assert_eq!(next_state(Processing, RecordingRejected), Some(Idle));
        assert_eq!(next_state(Processing, TurnFailed), Some(Idle));
        assert_eq!(next_state(Processing, ReplyWithoutAudio), Some(Idle));
        assert_eq!(next_state(Processing, PlaybackFailed), Some(Idle));
    }

    #[test]
    fn playback_pauses_resumes_and_finishes() {
        assert_eq!(next_state(Playing, Toggle), Some(Paused));
        assert_eq!(next_state(Paused, Toggle), Some(Playing));
        assert_eq!(next_state(Playing, PlaybackFinished), Some(Idle));
        assert_eq!(next_state(Paused, PlaybackFinished), Some(Idle));
    }

    #[test]
    fn capture_failures_surface_and_clear() {
        assert_eq!(next_state(Idle, CaptureFailed), Some(Error));
        assert_eq!(next_state(Error, NoticeExpired), Some(Idle));
        // A retry is allowed while the error notice is still up.
        assert_eq!(next_state(Error, CaptureStarted), Some(Recording));
        assert_eq!(next_state(Error, CaptureFailed), Some(Error));
    }

    #[test]
    fn quick_actions_only_fire_from_idle() {
        assert_eq!(next_state(Idle, MessageSubmitted), Some(Processing));
        assert_eq!(next_state(Recording, MessageSubmitted), None);
        assert_eq!(next_state(Processing, MessageSubmitted), None);
        assert_eq!(next_state(Playing, MessageSubmitted), None);
        assert_eq!(next_state(Paused, MessageSubmitted), None);
        assert_eq!(next_state(Error, MessageSubmitted), None);
    }

    #[test]
    fn unrelated_triggers_never_move_rest_states() {
        for trigger in [
            RecordingRejected,
            TurnFailed,
            ReplyWithoutAudio,
            AudioReady { autoplay: true },
            PlaybackFinished,
        ] {
            assert_eq!(next_state(Idle, trigger), None);
        }
        assert_eq!(
            next_state(Idle, Toggle),
            None,
            "toggle from idle is handled by opening capture, not the table"
        );
    }

    #[test]
    fn wire_names_are_stable() {
        assert_eq!(Idle.name(), "idle");
        assert_eq!(Recording.name(), "recording");
        assert_eq!(Processing.name(), "processing");
        assert_eq!(Play.name(), "play");
        assert_eq!(Playing.name(), "playing");
        assert_eq!(Paused.name(), "paused");
        assert_eq!(Error.name(), "error");
    }

    #[test]
    fn every_state_has_a_status_line() {
        for state in [Idle, Recording, Processing, Play, Playing, Paused, Error] {
            assert!(!state.status_line().is_empty());
        }
    }
}
