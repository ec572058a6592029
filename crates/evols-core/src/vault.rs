//! Vault session: the only holder of the master key.
//!
//! A `Vault` is either locked or unlocked. Unlocking derives the key, checks
//! it against the verification token and (when enrolled) a TOTP code, and
//! only then opens the record store. Locking drops the store connection and
//! zeroizes the key.
//!
//! Auto-lock: every guarded call first checks the idle timer; once the
//! configured number of minutes has passed without activity the session
//! locks itself and the call fails with `SessionLocked`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::backup::{self, BackupManifest};
use crate::error::{Result, VaultError};
use crate::kdf::{self, MasterKey};
use crate::models::{NewRecord, Record, RecordSummary, RecordUpdate};
use crate::paths::VaultPaths;
use crate::settings::AppSettings;
use crate::store::RecordStore;
use crate::strength::{self, StrengthLevel};
use crate::totp;
use crate::verification::{create_token, verify_token};

struct Session {
    key: MasterKey,
    store: RecordStore,
    last_activity: Instant,
}

enum State {
    Locked,
    Unlocked(Session),
}

/// Secret and enrolment URI handed out by [`Vault::enable_two_factor`].
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub title: String,
    pub score: Option<u8>,
    pub level: Option<StrengthLevel>,
    pub error: Option<String>,
}

/// Vault-wide password strength summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub weak: usize,
    pub medium: usize,
    pub strong: usize,
    pub failed: usize,
    pub entries: Vec<AuditEntry>,
}

pub struct Vault {
    paths: VaultPaths,
    settings: AppSettings,
    state: State,
    pending_two_factor: Option<Zeroizing<String>>,
}

impl Vault {
    /// Initialise a new vault in `paths` and return it unlocked.
    pub fn create(paths: VaultPaths, password: &str) -> Result<Self> {
        if password.is_empty() {
            return Err(VaultError::EmptyMasterPassword);
        }
        if paths.salt().exists() || paths.token().exists() {
            return Err(VaultError::VaultAlreadyExists(
                paths.root().display().to_string(),
            ));
        }
        fs::create_dir_all(paths.root())?;

        let salt = kdf::generate_salt();
        let key = kdf::derive_with_salt(password, &salt);
        let token = create_token(&key)?;
        write_synced(&paths.salt(), salt.as_bytes())?;
        write_synced(&paths.token(), token.as_bytes())?;
        let store = RecordStore::open(&paths.database())?;
        let settings = AppSettings::load(&paths.settings());

        info!(dir = %paths.root().display(), "vault created");
        Ok(Self {
            paths,
            settings,
            state: State::Unlocked(Session {
                key,
                store,
                last_activity: Instant::now(),
            }),
            pending_two_factor: None,
        })
    }

    /// Open an existing vault in the locked state.
    pub fn open(paths: VaultPaths) -> Result<Self> {
        if !paths.vault_exists() {
            return Err(VaultError::VaultMissing(paths.root().display().to_string()));
        }
        let settings = AppSettings::load(&paths.settings());
        Ok(Self {
            paths,
            settings,
            state: State::Locked,
            pending_two_factor: None,
        })
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    // ========================================================================
    // Lock state
    // ========================================================================

    /// Unlock with the master password and, when enrolled, a TOTP code.
    ///
    /// The password is checked against the verification token before the
    /// second factor is asked for and before the record store is opened.
    pub fn unlock(&mut self, password: &str, otp: Option<&str>) -> Result<()> {
        let salt = read_vault_file(&self.paths, &self.paths.salt())?;
        let token = read_vault_file(&self.paths, &self.paths.token())?;
        let live_key = verified_key(password, &salt, &String::from_utf8_lossy(&token))?;

        let staged = self.paths.has_staged_rekey();
        let staged_key = if staged { self.staged_key(password) } else { None };

        if live_key.is_none() && staged_key.is_none() {
            warn!("unlock rejected: wrong master password");
            return Err(VaultError::WrongMasterPassword);
        }

        self.check_two_factor(otp)?;
        let store = RecordStore::open(&self.paths.database())?;

        let key = match (live_key, staged_key) {
            (Some(key), None) if !staged => key,
            (live_key, staged_key) => self.reconcile_rekey(&store, live_key, staged_key)?,
        };

        self.state = State::Unlocked(Session {
            key,
            store,
            last_activity: Instant::now(),
        });
        info!("vault unlocked");
        Ok(())
    }

    /// Drop the store connection and zeroize the key.
    pub fn lock(&mut self) {
        if matches!(self.state, State::Unlocked(_)) {
            info!("vault locked");
        }
        self.state = State::Locked;
        self.pending_two_factor = None;
    }

    /// Whether the session is locked. Locks it first if the idle timeout
    /// has elapsed.
    pub fn is_locked(&mut self) -> bool {
        let expired = match &self.state {
            State::Locked => return true,
            State::Unlocked(session) => session.last_activity.elapsed() >= self.auto_lock_timeout(),
        };
        if expired {
            warn!(
                idle_minutes = self.settings.auto_lock_minutes,
                "auto-lock: idle timeout reached"
            );
            self.lock();
        }
        expired
    }

    /// Record activity (resets the auto-lock timer).
    pub fn touch(&mut self) {
        if let State::Unlocked(session) = &mut self.state {
            session.last_activity = Instant::now();
        }
    }

    /// Time left before auto-lock, `None` while locked.
    pub fn time_until_lock(&self) -> Option<Duration> {
        match &self.state {
            State::Locked => None,
            State::Unlocked(session) => Some(
                self.auto_lock_timeout()
                    .saturating_sub(session.last_activity.elapsed()),
            ),
        }
    }

    /// Change the idle timeout (clamped to at least one minute) and persist it.
    pub fn set_auto_lock_minutes(&mut self, minutes: u32) -> Result<()> {
        self.settings.set_auto_lock_minutes(minutes);
        self.settings.save(&self.paths.settings())
    }

    /// Replace all settings, clamping the idle timeout, and persist them.
    pub fn update_settings(&mut self, settings: AppSettings) -> Result<()> {
        let minutes = settings.auto_lock_minutes;
        self.settings = settings;
        self.set_auto_lock_minutes(minutes)
    }

    fn auto_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.auto_lock_secs())
    }

    /// Guard for every key-bearing operation.
    fn session(&mut self) -> Result<&mut Session> {
        if self.is_locked() {
            return Err(VaultError::SessionLocked);
        }
        match &mut self.state {
            State::Unlocked(session) => {
                session.last_activity = Instant::now();
                Ok(session)
            }
            State::Locked => Err(VaultError::SessionLocked),
        }
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub fn add(&mut self, record: &NewRecord) -> Result<i64> {
        let session = self.session()?;
        session.store.add(&session.key, record)
    }

    pub fn get(&mut self, id: i64) -> Result<Record> {
        let session = self.session()?;
        session.store.get(&session.key, id)
    }

    pub fn list(&mut self) -> Result<Vec<RecordSummary>> {
        self.session()?.store.list()
    }

    pub fn search(&mut self, query: &str) -> Result<Vec<RecordSummary>> {
        self.session()?.store.search(query)
    }

    pub fn update(&mut self, id: i64, update: &RecordUpdate) -> Result<bool> {
        let session = self.session()?;
        session.store.update(&session.key, id, update)
    }

    pub fn delete(&mut self, id: i64) -> Result<bool> {
        self.session()?.store.delete(id)
    }

    pub fn folders(&mut self) -> Result<Vec<String>> {
        self.session()?.store.folders()
    }

    pub fn list_folder(&mut self, folder: Option<&str>) -> Result<Vec<RecordSummary>> {
        self.session()?.store.list_folder(folder)
    }

    pub fn move_to_folder(&mut self, id: i64, folder: Option<&str>) -> Result<bool> {
        self.session()?.store.move_to_folder(id, folder)
    }

    pub fn count(&mut self) -> Result<usize> {
        self.session()?.store.count()
    }

    /// Score every stored password. Records that fail to decrypt are listed
    /// with their error and counted in `failed`.
    pub fn strength_report(&mut self) -> Result<AuditReport> {
        let session = self.session()?;
        let mut report = AuditReport::default();

        for summary in session.store.list()? {
            match session.store.get(&session.key, summary.id) {
                Ok(record) => {
                    let scored = strength::score(&record.password);
                    match scored.level {
                        StrengthLevel::VeryWeak | StrengthLevel::Weak => report.weak += 1,
                        StrengthLevel::Medium => report.medium += 1,
                        StrengthLevel::Strong | StrengthLevel::VeryStrong => report.strong += 1,
                    }
                    report.entries.push(AuditEntry {
                        id: summary.id,
                        title: summary.title,
                        score: Some(scored.score),
                        level: Some(scored.level),
                        error: None,
                    });
                }
                Err(err @ VaultError::DecryptionFailure { .. }) => {
                    warn!(id = summary.id, "audit: record could not be decrypted");
                    report.failed += 1;
                    report.entries.push(AuditEntry {
                        id: summary.id,
                        title: summary.title,
                        score: None,
                        level: None,
                        error: Some(err.to_string()),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    // ========================================================================
    // Master password change
    // ========================================================================

    /// Re-encrypt the vault under a new master password.
    ///
    /// The new salt and token are staged next to the live ones, the records
    /// are rekeyed in one transaction, and only then are the staged files
    /// renamed over the live pair. A crash in between is reconciled by the
    /// next [`unlock`](Self::unlock).
    pub fn change_master_password(&mut self, current: &str, new: &str) -> Result<usize> {
        if new.is_empty() {
            return Err(VaultError::EmptyMasterPassword);
        }
        let paths = self.paths.clone();
        if self.settings.auto_backup {
            self.backup(None)?;
        }
        let session = self.session()?;

        let salt = read_vault_file(&paths, &paths.salt())?;
        let token = read_vault_file(&paths, &paths.token())?;
        if verified_key(current, &salt, &String::from_utf8_lossy(&token))?.is_none() {
            warn!("master password change rejected: current password does not verify");
            return Err(VaultError::WrongMasterPassword);
        }

        let new_salt = kdf::generate_salt();
        let new_key = kdf::derive_with_salt(new, &new_salt);
        let new_token = create_token(&new_key)?;
        write_synced(&paths.staged_salt(), new_salt.as_bytes())?;
        write_synced(&paths.staged_token(), new_token.as_bytes())?;

        let count = match session.store.rekey(&session.key, &new_key) {
            Ok(count) => count,
            Err(err) => {
                discard_staged(&paths)?;
                return Err(err);
            }
        };
        session.key = new_key;
        promote_staged(&paths)?;

        info!(records = count, "master password changed");
        Ok(count)
    }

    /// Key for the staged salt/token pair, falling back to the live file for
    /// whichever half was already promoted.
    fn staged_key(&self, password: &str) -> Option<MasterKey> {
        let pick = |staged: PathBuf, live: PathBuf| {
            fs::read(&staged).or_else(|_| fs::read(live)).ok()
        };
        let salt = pick(self.paths.staged_salt(), self.paths.salt())?;
        let token = pick(self.paths.staged_token(), self.paths.token())?;
        verified_key(password, &salt, &String::from_utf8_lossy(&token))
            .ok()
            .flatten()
    }

    /// Settle an interrupted password change by probing which key the
    /// records are actually under.
    fn reconcile_rekey(
        &self,
        store: &RecordStore,
        live_key: Option<MasterKey>,
        staged_key: Option<MasterKey>,
    ) -> Result<MasterKey> {
        if let Some(key) = staged_key {
            if store.key_matches(&key)? != Some(false) {
                warn!("recovering interrupted password change: promoting staged key files");
                promote_staged(&self.paths)?;
                return Ok(key);
            }
        }
        if let Some(key) = live_key {
            if store.key_matches(&key)? != Some(false) {
                warn!("recovering interrupted password change: discarding staged key files");
                discard_staged(&self.paths)?;
                return Ok(key);
            }
            warn!("records are under a newer key than the one this password unlocks");
            return Err(VaultError::RekeyIncomplete);
        }
        warn!("staged key files do not match the records; discarding them");
        discard_staged(&self.paths)?;
        Err(VaultError::WrongMasterPassword)
    }

    // ========================================================================
    // Two-factor
    // ========================================================================

    pub fn two_factor_enabled(&self) -> bool {
        self.paths.two_factor_secret().is_file()
    }

    /// Start enrolment with a fresh secret. Nothing is written until
    /// [`confirm_two_factor`](Self::confirm_two_factor) succeeds.
    pub fn enable_two_factor(&mut self, account: &str) -> Result<TwoFactorSetup> {
        self.begin_two_factor(account, totp::generate_secret())
    }

    /// Start enrolment with a caller-supplied base32 secret.
    pub fn enable_two_factor_with_secret(
        &mut self,
        account: &str,
        secret: &str,
    ) -> Result<TwoFactorSetup> {
        let secret = totp::normalize_secret(secret);
        if secret.is_empty() || totp::code_at(&secret, 0).is_none() {
            return Err(VaultError::InvalidTwoFactorSecret);
        }
        self.begin_two_factor(account, secret)
    }

    fn begin_two_factor(&mut self, account: &str, secret: String) -> Result<TwoFactorSetup> {
        self.session()?;
        let setup = TwoFactorSetup {
            provisioning_uri: totp::provisioning_uri(&secret, account),
            secret: secret.clone(),
        };
        self.pending_two_factor = Some(Zeroizing::new(secret));
        Ok(setup)
    }

    /// Finish enrolment by proving a code for the pending secret.
    pub fn confirm_two_factor(&mut self, code: &str) -> Result<()> {
        self.session()?;
        let secret = self
            .pending_two_factor
            .as_ref()
            .ok_or(VaultError::TwoFactorNotPending)?;
        if !totp::verify(secret, code) {
            return Err(VaultError::InvalidTwoFactorCode);
        }
        write_synced(&self.paths.two_factor_secret(), secret.as_bytes())?;
        self.pending_two_factor = None;
        info!("two-factor authentication enabled");
        Ok(())
    }

    /// Remove the second factor. Requires a valid current code.
    pub fn disable_two_factor(&mut self, code: &str) -> Result<()> {
        self.session()?;
        let Some(secret) = read_two_factor_secret(&self.paths)? else {
            return Ok(());
        };
        if !totp::verify(&secret, code) {
            return Err(VaultError::InvalidTwoFactorCode);
        }
        fs::remove_file(self.paths.two_factor_secret())?;
        info!("two-factor authentication disabled");
        Ok(())
    }

    fn check_two_factor(&self, otp: Option<&str>) -> Result<()> {
        let Some(secret) = read_two_factor_secret(&self.paths)? else {
            return Ok(());
        };
        let code = otp
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or(VaultError::TwoFactorRequired)?;
        if totp::verify(&secret, code) {
            Ok(())
        } else {
            warn!("unlock rejected: invalid two-factor code");
            Err(VaultError::InvalidTwoFactorCode)
        }
    }

    // ========================================================================
    // Backup
    // ========================================================================

    /// Snapshot every vault file into `dest`, or the configured backup
    /// directory, or `<data dir>/backups`.
    pub fn backup(&mut self, dest: Option<&Path>) -> Result<(PathBuf, BackupManifest)> {
        let dest = dest
            .map(Path::to_path_buf)
            .or_else(|| self.settings.backup_dir.clone())
            .unwrap_or_else(|| self.paths.backups());
        let paths = self.paths.clone();
        let session = self.session()?;
        backup::create_backup(&paths, &session.store, &dest)
    }

    #[cfg(test)]
    fn backdate_activity(&mut self, by: Duration) {
        if let State::Unlocked(session) = &mut self.state {
            if let Some(earlier) = Instant::now().checked_sub(by) {
                session.last_activity = earlier;
            }
        }
    }
}

/// Derive from `password` and return the key only if it opens `token`.
fn verified_key(password: &str, salt: &[u8], token: &str) -> Result<Option<MasterKey>> {
    let key = kdf::derive(password, salt)?;
    Ok(verify_token(&key, token).then_some(key))
}

fn read_vault_file(paths: &VaultPaths, path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => VaultError::VaultMissing(paths.root().display().to_string()),
        _ => VaultError::Io(err),
    })
}

fn read_two_factor_secret(paths: &VaultPaths) -> Result<Option<Zeroizing<String>>> {
    match fs::read_to_string(paths.two_factor_secret()) {
        Ok(raw) => {
            let secret = Zeroizing::new(totp::normalize_secret(&raw));
            if secret.is_empty() || totp::code_at(&secret, 0).is_none() {
                warn!("two-factor secret file is empty or not valid base32");
                return Err(VaultError::InvalidTwoFactorSecret);
            }
            Ok(Some(secret))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

fn promote_staged(paths: &VaultPaths) -> Result<()> {
    for (staged, live) in [
        (paths.staged_salt(), paths.salt()),
        (paths.staged_token(), paths.token()),
    ] {
        if staged.exists() {
            fs::rename(staged, live)?;
        }
    }
    Ok(())
}

fn discard_staged(paths: &VaultPaths) -> Result<()> {
    for staged in [paths.staged_salt(), paths.staged_token()] {
        match fs::remove_file(staged) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
