//! Conversation session identity.
//!
//! The backend threads conversation memory through a session id. We keep
//! the last id on disk so a restart resumes the same conversation, and we
//! adopt whatever id the backend hands back on each response.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::read_json_file;

/// Environment override for the session id, taking precedence over the
/// persisted one.
pub const SESSION_ENV: &str = "SLEEPTALK_SESSION";

/// session.json shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Holds the current session id and mirrors every change to disk.
pub struct SessionStore {
    path: PathBuf,
    current: Option<String>,
}

impl SessionStore {
    /// Load the persisted id, honoring the `SLEEPTALK_SESSION` override.
    pub fn load(path: PathBuf) -> Self {
        let override_id = std::env::var(SESSION_ENV).ok();
        Self::load_with_override(path, override_id)
    }

    pub(crate) fn load_with_override(path: PathBuf, override_id: Option<String>) -> Self {
        let persisted = read_json_file::<SessionFile>(&path)
            .and_then(|f| f.session_id)
            .filter(|id| !id.trim().is_empty());

        let mut store = Self {
            path,
            current: persisted,
        };

        let override_id = override_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        if let Some(id) = override_id {
            debug!(session = %id, "session id taken from environment");
            if store.current.as_deref() != Some(id.as_str()) {
                store.current = Some(id);
                store.persist();
            }
        }

        store
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Adopt a session id reported by the backend. Empty or unchanged ids
    /// are ignored. Returns whether the id changed.
    pub fn adopt(&mut self, candidate: Option<&str>) -> bool {
        let Some(id) = candidate.map(str::trim).filter(|id| !id.is_empty()) else {
            return false;
        };
        if self.current.as_deref() == Some(id) {
            return false;
        }
        debug!(session = %id, "adopting session id");
        self.current = Some(id.to_string());
        self.persist();
        true
    }

    fn persist(&self) {
        let file = SessionFile {
            session_id: self.current.clone(),
            updated_at: Some(Utc::now()),
        };
        if let Err(e) = write_atomic(&self.path, &file) {
            warn!(path = %self.path.display(), "could not persist session id: {e}");
        }
    }
}

/// Write via a temp file, then rename (prevents corrupt partial writes).
fn write_atomic(path: &std::path::Path, file: &SessionFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(file)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("session.json")
    }

    #[test]
    fn missing_file_starts_without_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::load_with_override(store_at(&dir), None);
        assert_eq!(store.current(), None);
    }

    #[test]
    fn adopt_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_at(&dir);

        let mut store = SessionStore::load_with_override(path.clone(), None);
        assert!(store.adopt(Some("abc")));
        assert_eq!(store.current(), Some("abc"));

        let reloaded = SessionStore::load_with_override(path, None);
        assert_eq!(reloaded.current(), Some("abc"));
    }

    #[test]
    fn empty_ids_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::load_with_override(store_at(&dir), None);
        store.adopt(Some("abc"));

        assert!(!store.adopt(None));
        assert!(!store.adopt(Some("")));
        assert!(!store.adopt(Some("   ")));
        assert_eq!(store.current(), Some("abc"));
    }

    #[test]
    fn unchanged_id_reports_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::load_with_override(store_at(&dir), None);
        assert!(store.adopt(Some("abc")));
        assert!(!store.adopt(Some("abc")));
    }

    #[test]
    fn environment_override_wins_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_at(&dir);

        let mut store = SessionStore::load_with_override(path.clone(), None);
        store.adopt(Some("persisted"));
        drop(store);

        let store = SessionStore::load_with_override(path.clone(), Some("override".into()));
        assert_eq!(store.current(), Some("override"));

        let reloaded = SessionStore::load_with_override(path, None);
        assert_eq!(reloaded.current(), Some("override"));
    }
}
