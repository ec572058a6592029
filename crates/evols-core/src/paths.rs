use directories::ProjectDirs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "evols";
pub const APP_NAME: &str = "vault";

/// Overrides the platform data directory when set.
pub const DATA_DIR_ENV: &str = "EVOLS_DATA_DIR";

pub const SALT_FILE: &str = "vault.salt";
pub const TOKEN_FILE: &str = "verify.token";
pub const DATABASE_FILE: &str = "passwords.db";
pub const TWO_FACTOR_FILE: &str = "2fa_secret.key";
pub const SETTINGS_FILE: &str = "settings.json";
pub const BACKUP_DIR: &str = "backups";

/// Suffix of the files staged during a master password change.
pub const STAGED_SUFFIX: &str = ".new";

/// Locations of every file that makes up one vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    root: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$EVOLS_DATA_DIR` if set, otherwise the platform data directory.
    pub fn default_location() -> Result<Self> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "cannot determine data directory")
        })?;
        Ok(Self::new(dirs.data_dir()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn salt(&self) -> PathBuf {
        self.root.join(SALT_FILE)
    }

    pub fn token(&self) -> PathBuf {
        self.root.join(TOKEN_FILE)
    }

    pub fn database(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn two_factor_secret(&self) -> PathBuf {
        self.root.join(TWO_FACTOR_FILE)
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn backups(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    pub fn staged_salt(&self) -> PathBuf {
        self.root.join(format!("{SALT_FILE}{STAGED_SUFFIX}"))
    }

    pub fn staged_token(&self) -> PathBuf {
        self.root.join(format!("{TOKEN_FILE}{STAGED_SUFFIX}"))
    }

    /// A vault exists once its salt and verification token are both on disk.
    pub fn vault_exists(&self) -> bool {
        self.salt().is_file() && self.token().is_file()
    }

    pub fn has_staged_rekey(&self) -> bool {
        self.staged_salt().exists() || self.staged_token().exists()
    }
}
