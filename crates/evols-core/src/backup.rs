//! Vault snapshots.
//!
//! A backup is a timestamped directory holding copies of every vault file and
//! a `manifest.json` with their SHA-256 digests. The database goes through
//! SQLite's online backup API so the copy is consistent even while the store
//! connection is open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::paths::{VaultPaths, DATABASE_FILE, SALT_FILE, TOKEN_FILE, TWO_FACTOR_FILE};
use crate::store::RecordStore;

pub const MANIFEST_FILE: &str = "manifest.json";
const DIR_PREFIX: &str = "evols-backup-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub file: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub created_at: DateTime<Utc>,
    pub files: Vec<BackupEntry>,
}

/// Write a snapshot under `dest_root` and return its directory and manifest.
pub fn create_backup(
    paths: &VaultPaths,
    store: &RecordStore,
    dest_root: &Path,
) -> Result<(PathBuf, BackupManifest)> {
    let created_at = Utc::now();
    let dir = unique_dir(dest_root, &created_at)?;

    let mut names = Vec::with_capacity(4);
    for (src, name) in [(paths.salt(), SALT_FILE), (paths.token(), TOKEN_FILE)] {
        std::fs::copy(&src, dir.join(name))?;
        names.push(name);
    }
    store.backup_to(&dir.join(DATABASE_FILE))?;
    names.push(DATABASE_FILE);
    if paths.two_factor_secret().is_file() {
        std::fs::copy(paths.two_factor_secret(), dir.join(TWO_FACTOR_FILE))?;
        names.push(TWO_FACTOR_FILE);
    }

    let files = names
        .into_iter()
        .map(|name| digest_entry(&dir, name))
        .collect::<Result<Vec<_>>>()?;
    let manifest = BackupManifest { created_at, files };
    std::fs::write(
        dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    info!(dir = %dir.display(), files = manifest.files.len(), "backup written");
    Ok((dir, manifest))
}

/// Recompute digests and compare them with the manifest in `dir`.
pub fn verify_backup(dir: &Path) -> Result<bool> {
    let manifest: BackupManifest =
        serde_json::from_str(&std::fs::read_to_string(dir.join(MANIFEST_FILE))?)?;
    for entry in &manifest.files {
        let path = dir.join(&entry.file);
        if !path.is_file() || sha256_file(&path)? != entry.sha256 {
            return Ok(false);
        }
    }
    Ok(true)
}

fn unique_dir(root: &Path, at: &DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    let stamp = at.format("%Y%m%d-%H%M%S").to_string();
    let mut candidate = root.join(format!("{DIR_PREFIX}{stamp}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = root.join(format!("{DIR_PREFIX}{stamp}-{n}"));
        n += 1;
    }
    std::fs::create_dir(&candidate)?;
    Ok(candidate)
}

fn digest_entry(dir: &Path, name: &str) -> Result<BackupEntry> {
    let path = dir.join(name);
    Ok(BackupEntry {
        file: name.to_owned(),
        sha256: sha256_file(&path)?,
        size: std::fs::metadata(&path)?.len(),
    })
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::MasterKey;
    use crate::models::NewRecord;
    use tempfile::tempdir;

    fn scratch_vault(dir: &Path) -> (VaultPaths, RecordStore) {
        let paths = VaultPaths::new(dir);
        std::fs::write(paths.salt(), [1u8; 16]).unwrap();
        std::fs::write(paths.token(), "token").unwrap();
        let store = RecordStore::open(&paths.database()).unwrap();
        store
            .add(&MasterKey::generate(), &NewRecord::new("Gmail", "hunter2"))
            .unwrap();
        (paths, store)
    }

    #[test]
    fn snapshot_contains_every_file() {
        let vault_dir = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let (paths, store) = scratch_vault(vault_dir.path());

        let (dir, manifest) = create_backup(&paths, &store, dest.path()).unwrap();
        assert!(dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("evols-backup-"));
        let files: Vec<_> = manifest.files.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, vec![SALT_FILE, TOKEN_FILE, DATABASE_FILE]);
        assert!(verify_backup(&dir).unwrap());

        let copy = RecordStore::open(&dir.join(DATABASE_FILE)).unwrap();
        assert_eq!(copy.count().unwrap(), 1);
    }

    #[test]
    fn two_factor_secret_is_included_when_present() {
        let vault_dir = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let (paths, store) = scratch_vault(vault_dir.path());
        std::fs::write(paths.two_factor_secret(), "GEZDGNBVGY3TQOJQ").unwrap();

        let (_, first) = create_backup(&paths, &store, dest.path()).unwrap();
        let (second_dir, second) = create_backup(&paths, &store, dest.path()).unwrap();
        assert!(first.files.iter().any(|e| e.file == TWO_FACTOR_FILE));
        assert_eq!(second.files.len(), 4);
        assert!(verify_backup(&second_dir).unwrap());
    }

    #[test]
    fn tampered_copy_fails_verification() {
        let vault_dir = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let (paths, store) = scratch_vault(vault_dir.path());
        let (dir, _) = create_backup(&paths, &store, dest.path()).unwrap();
        std::fs::write(dir.join(TOKEN_FILE), "forged").unwrap();
        assert!(!verify_backup(&dir).unwrap());
    }
}
