//! Platform data directory for settings and session state.
//!
//!   Linux:   $XDG_CONFIG_HOME/sleeptalk (default ~/.config/sleeptalk)
//!   macOS:   ~/Library/Application Support/sleeptalk
//!   Windows: %APPDATA%\sleeptalk

use std::path::PathBuf;

/// Directory holding settings.json and session.json.
///
/// Falls back to the current directory when the platform config dir cannot
/// be resolved (headless containers without $HOME).
pub fn data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sleeptalk")
}
