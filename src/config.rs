//! User settings.
//!
//! The settings file at `~/.always-early/config.json` is owned by an
//! external settings surface; the daemon only reads it, and re-reads it on
//! every sync cycle so a changed lead time applies without a restart. A
//! missing or partial file falls back to serde defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_LEAD_TIME_MINUTES: u32 = 2;
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 5;

/// Upper bound for the configurable lead time, in minutes.
pub const MAX_LEAD_TIME_MINUTES: u32 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Minutes before an event's start at which its meeting opens.
    pub lead_time_minutes: u32,
    /// Minutes between calendar sync cycles.
    pub sync_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lead_time_minutes: DEFAULT_LEAD_TIME_MINUTES,
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
        }
    }
}

impl Config {
    /// Read the settings file, falling back to defaults if it is missing or
    /// unreadable.
    pub fn load() -> Self {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub(crate) fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring malformed config at {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// The configured lead time, clamped to `[0, 30]` minutes.
    pub fn lead_time_minutes(&self) -> u32 {
        self.lead_time_minutes.min(MAX_LEAD_TIME_MINUTES)
    }
}

/// Canonical settings path: `~/.always-early/config.json`.
pub fn config_path() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".always-early").join("config.json"))
}
