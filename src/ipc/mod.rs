//! IPC protocol types for communication with the UI shell.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> shell).
//! Commands use `{"command": "<name>", ...}` format (shell -> core).

pub mod bridge;

pub use bridge::emit_event;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Events: core -> shell (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the shell via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum UiEvent {
    Starting {},
    Loading { step: String },
    Ready {},
    /// Interaction state changed; `state` is the snake_case state name.
    StateChange { state: String },
    /// Human-readable status line for the shell's status area.
    Status { text: String },
    /// Transient user-facing notice; `kind` is "error" or "info".
    Notice { message: String, kind: String },
    NoticeCleared {},
    /// A conversation entry was appended.
    EntryAppended { id: u64, role: String, text: String },
    /// An existing entry's text was replaced (placeholder fill-in).
    EntryUpdated { id: u64, text: String },
    /// The shell should bring the newest entry into view.
    ScrollLatest {},
    /// The backend conversation id changed (and was persisted).
    Session { id: String },
    RecordingStart {},
    RecordingStop {},
    PlaybackStart {},
    PlaybackEnd {},
    AudioDevices { input: Vec<AudioDeviceInfo> },
    Pong {},
    Stopping {},
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: i32,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Commands: shell -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the shell via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum UiCommand {
    /// The primary control: tap to record, stop, play, pause or resume
    /// depending on the current state.
    Toggle {},
    /// Send one of the canned quick-action messages without recording.
    QuickAction { action: String },
    SetVolume { volume: f32 },
    ListAudioDevices {},
    Ping {},
    Stop {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag_and_data() {
        let json = serde_json::to_string(&UiEvent::StateChange {
            state: "recording".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"state_change","data":{"state":"recording"}}"#);
    }

    #[test]
    fn empty_variants_serialize_with_empty_data() {
        let json = serde_json::to_string(&UiEvent::Ready {}).unwrap();
        assert_eq!(json, r#"{"event":"ready","data":{}}"#);
    }

    #[test]
    fn commands_parse_from_tagged_json() {
        let cmd: UiCommand = serde_json::from_str(r#"{"command": "toggle"}"#).unwrap();
        assert!(matches!(cmd, UiCommand::Toggle {}));

        let cmd: UiCommand =
            serde_json::from_str(r#"{"command": "quick_action", "action": "story"}"#).unwrap();
        match cmd {
            UiCommand::QuickAction { action } => assert_eq!(action, "story"),
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd: UiCommand =
            serde_json::from_str(r#"{"command": "set_volume", "volume": 0.5}"#).unwrap();
        match cmd {
            UiCommand::SetVolume { volume } => assert!((volume - 0.5).abs() < f32::EPSILON),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(serde_json::from_str::<UiCommand>(r#"{"command": "reboot"}"#).is_err());
    }
}
