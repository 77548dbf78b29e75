//! Settings file reading and storage paths.

pub mod paths;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use paths::data_dir;

/// settings.json shape. Every field is optional on disk; missing values
/// fall back to the defaults below. The shell owns writes to this file;
/// the core only reads it.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Base URL of the transcription/chat backend.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Start playback as soon as reply audio is ready (desktop behavior).
    /// When false, the response parks until the user triggers playback.
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
    /// Input device name; `None` uses the system default microphone.
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default = "default_volume")]
    pub playback_volume: f32,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_autoplay() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            autoplay: default_autoplay(),
            input_device: None,
            playback_volume: default_volume(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Read settings.json from the data directory, falling back to defaults
/// when the file is missing or unreadable.
pub fn read_settings() -> Settings {
    read_json_file(&settings_path()).unwrap_or_default()
}

/// Path to settings.json.
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Path to session.json (the persisted backend conversation id).
pub fn session_path() -> PathBuf {
    data_dir().join("session.json")
}

/// Read and deserialize a JSON file; `None` covers both a missing file and
/// a malformed one.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to read {}: {}", path.display(), e);
            }
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.backend_url, "http://127.0.0.1:5000");
        assert!(s.autoplay);
        assert!(s.input_device.is_none());
        assert!((s.playback_volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(s.request_timeout_secs, 60);
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"backend_url": "http://sleep.local", "autoplay": false}}"#).unwrap();

        let s: Settings = read_json_file(&path).unwrap();
        assert_eq!(s.backend_url, "http://sleep.local");
        assert!(!s.autoplay);
        assert_eq!(s.request_timeout_secs, 60);
    }

    #[test]
    fn unreadable_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(read_json_file::<Settings>(&path).is_none());
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(read_json_file::<Settings>(&path).is_none());
    }
}
