use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

pub const DEFAULT_AUTO_LOCK_MINUTES: u32 = 5;
pub const MIN_AUTO_LOCK_MINUTES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Idle minutes before the session locks itself.
    pub auto_lock_minutes: u32,
    /// Destination root for backups; `None` means `<data dir>/backups`.
    pub backup_dir: Option<PathBuf>,
    pub auto_backup: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_lock_minutes: DEFAULT_AUTO_LOCK_MINUTES,
            backup_dir: None,
            auto_backup: false,
        }
    }
}

impl AppSettings {
    /// Load from `path`. A missing or unreadable file yields the defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Self>(&raw) {
            Ok(mut settings) => {
                settings.set_auto_lock_minutes(settings.auto_lock_minutes);
                settings
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring malformed settings file");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn set_auto_lock_minutes(&mut self, minutes: u32) {
        self.auto_lock_minutes = minutes.max(MIN_AUTO_LOCK_MINUTES);
    }

    pub fn auto_lock_secs(&self) -> u64 {
        u64::from(self.auto_lock_minutes) * 60
    }
}
