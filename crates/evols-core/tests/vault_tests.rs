use evols_core::backup::verify_backup;
use evols_core::kdf::{self, MasterKey};
use evols_core::verification::{create_token, verify_token};
use evols_core::{totp, NewRecord, RecordStore, RecordUpdate, Vault, VaultError, VaultPaths};
use rusqlite::Connection;
use tempfile::tempdir;

const MASTER: &str = "Tr0ub4dor&3";

fn gmail() -> NewRecord {
    NewRecord {
        title: "Gmail".into(),
        username: "me@x.com".into(),
        password: "hunter2".into(),
        ..Default::default()
    }
}

fn live_key(paths: &VaultPaths, password: &str) -> MasterKey {
    kdf::derive(password, &std::fs::read(paths.salt()).unwrap()).unwrap()
}

#[test]
fn first_run_then_relogin() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());

    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    let id = vault
        .add(&NewRecord {
            url: "https://gmail.com".into(),
            category: "Email".into(),
            ..gmail()
        })
        .unwrap();
    assert_eq!(std::fs::read(paths.salt()).unwrap().len(), 16);
    drop(vault);

    let token = std::fs::read_to_string(paths.token()).unwrap();
    assert!(verify_token(&live_key(&paths, MASTER), &token));
    assert!(!verify_token(&live_key(&paths, "wrong"), &token));

    let mut vault = Vault::open(paths.clone()).unwrap();
    assert!(vault.is_locked());
    assert!(matches!(
        vault.unlock("wrong", None),
        Err(VaultError::WrongMasterPassword)
    ));
    assert!(vault.is_locked());

    vault.unlock(MASTER, None).unwrap();
    let record = vault.get(id).unwrap();
    assert_eq!(record.title, "Gmail");
    assert_eq!(record.username, "me@x.com");
    assert_eq!(record.password, "hunter2");
    assert_eq!(record.url, "https://gmail.com");
    assert_eq!(record.category, "Email");
    assert_eq!(record.notes, "");
}

#[test]
fn sensitive_columns_are_ciphertext_on_disk() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    vault
        .add(&NewRecord {
            notes: "pin 1234".into(),
            url: "https://gmail.com".into(),
            ..gmail()
        })
        .unwrap();
    vault.lock();

    let conn = Connection::open(paths.database()).unwrap();
    let (title, username, password, url, notes): (String, String, String, String, String) = conn
        .query_row(
            "SELECT title, username, password, url, notes FROM passwords",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .unwrap();
    assert_eq!(title, "Gmail");
    assert_eq!(url, "https://gmail.com");
    for (cipher, plain) in [(username, "me@x.com"), (password, "hunter2"), (notes, "pin 1234")] {
        assert!(!cipher.is_empty());
        assert!(!cipher.contains(plain));
    }
}

#[test]
fn empty_vault_still_rejects_wrong_password() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    Vault::create(paths.clone(), MASTER).unwrap();

    let mut vault = Vault::open(paths).unwrap();
    assert!(matches!(
        vault.unlock("not it", None),
        Err(VaultError::WrongMasterPassword)
    ));
    vault.unlock(MASTER, None).unwrap();
    assert!(vault.list().unwrap().is_empty());
}

#[test]
fn create_and_open_preconditions() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path().join("vault"));

    assert!(matches!(Vault::open(paths.clone()), Err(VaultError::VaultMissing(_))));
    assert!(matches!(
        Vault::create(paths.clone(), ""),
        Err(VaultError::EmptyMasterPassword)
    ));
    Vault::create(paths.clone(), MASTER).unwrap();
    assert!(matches!(
        Vault::create(paths.clone(), MASTER),
        Err(VaultError::VaultAlreadyExists(_))
    ));

    std::fs::write(paths.salt(), [0u8; 15]).unwrap();
    let mut vault = Vault::open(paths).unwrap();
    assert!(matches!(
        vault.unlock(MASTER, None),
        Err(VaultError::InvalidSaltLength { expected: 16, actual: 15 })
    ));
}

#[test]
fn record_lifecycle_through_the_session() {
    let dir = tempdir().unwrap();
    let mut vault = Vault::create(VaultPaths::new(dir.path()), MASTER).unwrap();

    assert!(matches!(vault.add(&NewRecord::new("", "x")), Err(VaultError::EmptyTitle)));
    assert!(matches!(vault.add(&NewRecord::new("x", "")), Err(VaultError::EmptyPassword)));

    let gmail = vault.add(&gmail()).unwrap();
    let bank = vault
        .add(&NewRecord {
            category: "Finance".into(),
            folder: Some("Money".into()),
            ..NewRecord::new("bank", "1234")
        })
        .unwrap();

    let titles: Vec<_> = vault.list().unwrap().into_iter().map(|r| r.title).collect();
    assert_eq!(titles, vec!["bank", "Gmail"]);
    assert_eq!(vault.search("finance").unwrap()[0].id, bank);
    assert_eq!(vault.folders().unwrap(), vec!["Money"]);

    assert!(vault
        .update(gmail, &RecordUpdate { notes: Some("2fa on".into()), ..Default::default() })
        .unwrap());
    assert_eq!(vault.get(gmail).unwrap().notes, "2fa on");

    assert!(vault.move_to_folder(gmail, Some("Money")).unwrap());
    assert_eq!(vault.list_folder(Some("Money")).unwrap().len(), 2);

    assert!(vault.delete(bank).unwrap());
    assert!(matches!(vault.get(bank), Err(VaultError::RecordNotFound(_))));
    assert_eq!(vault.count().unwrap(), 1);
}

#[test]
fn master_password_change_rekeys_everything() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    let a = vault.add(&gmail()).unwrap();
    let b = vault
        .add(&NewRecord { notes: "note".into(), ..NewRecord::new("Bank", "1234") })
        .unwrap();
    let old_salt = std::fs::read(paths.salt()).unwrap();

    assert!(matches!(
        vault.change_master_password("wrong", "new pass"),
        Err(VaultError::WrongMasterPassword)
    ));
    assert!(matches!(
        vault.change_master_password(MASTER, ""),
        Err(VaultError::EmptyMasterPassword)
    ));

    assert_eq!(vault.change_master_password(MASTER, "new pass").unwrap(), 2);
    assert!(!paths.has_staged_rekey());
    assert_ne!(std::fs::read(paths.salt()).unwrap(), old_salt);
    let token = std::fs::read_to_string(paths.token()).unwrap();
    assert!(verify_token(&live_key(&paths, "new pass"), &token));
    assert!(!verify_token(&live_key(&paths, MASTER), &token));
    assert_eq!(vault.get(a).unwrap().password, "hunter2");
    vault.lock();

    assert!(matches!(
        vault.unlock(MASTER, None),
        Err(VaultError::WrongMasterPassword)
    ));
    vault.unlock("new pass", None).unwrap();
    assert_eq!(vault.get(a).unwrap().username, "me@x.com");
    assert_eq!(vault.get(b).unwrap().notes, "note");
}

/// Records rekeyed, staged files written, but the process died before
/// the staged salt and token were renamed into place.
fn interrupted_rekey(paths: &VaultPaths) {
    let old_key = live_key(paths, MASTER);
    let salt = kdf::generate_salt();
    let new_key = kdf::derive_with_salt("new pass", &salt);
    std::fs::write(paths.staged_salt(), salt.as_bytes()).unwrap();
    std::fs::write(paths.staged_token(), create_token(&new_key).unwrap()).unwrap();
    let mut store = RecordStore::open(&paths.database()).unwrap();
    store.rekey(&old_key, &new_key).unwrap();
}

#[test]
fn interrupted_rekey_is_completed_by_the_new_password() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    let id = vault.add(&gmail()).unwrap();
    drop(vault);
    interrupted_rekey(&paths);

    let mut vault = Vault::open(paths.clone()).unwrap();
    assert!(matches!(
        vault.unlock(MASTER, None),
        Err(VaultError::RekeyIncomplete)
    ));
    assert!(paths.has_staged_rekey());

    vault.unlock("new pass", None).unwrap();
    assert!(!paths.has_staged_rekey());
    assert_eq!(vault.get(id).unwrap().password, "hunter2");

    vault.lock();
    vault.unlock("new pass", None).unwrap();
}

#[test]
fn half_promoted_rekey_is_completed_by_the_new_password() {
    for promoted_first in ["salt", "token"] {
        let dir = tempdir().unwrap();
        let paths = VaultPaths::new(dir.path());
        let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
        let id = vault.add(&gmail()).unwrap();
        drop(vault);
        interrupted_rekey(&paths);
        if promoted_first == "salt" {
            std::fs::rename(paths.staged_salt(), paths.salt()).unwrap();
        } else {
            std::fs::rename(paths.staged_token(), paths.token()).unwrap();
        }

        let mut vault = Vault::open(paths.clone()).unwrap();
        assert!(
            matches!(vault.unlock(MASTER, None), Err(VaultError::WrongMasterPassword)),
            "{promoted_first} promoted"
        );
        assert!(paths.has_staged_rekey());

        vault.unlock("new pass", None).unwrap();
        assert!(!paths.has_staged_rekey());
        assert_eq!(vault.get(id).unwrap().password, "hunter2");

        vault.lock();
        vault.unlock("new pass", None).unwrap();
    }
}

#[test]
fn unreadable_two_factor_secret_fails_closed() {
    for contents in ["", "  \n", "not base32!"] {
        let dir = tempdir().unwrap();
        let paths = VaultPaths::new(dir.path());
        let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
        std::fs::write(paths.two_factor_secret(), contents).unwrap();
        assert!(vault.two_factor_enabled());

        assert!(matches!(
            vault.disable_two_factor("123456"),
            Err(VaultError::InvalidTwoFactorSecret)
        ));
        assert!(paths.two_factor_secret().is_file());

        vault.lock();
        assert!(matches!(
            vault.unlock(MASTER, None),
            Err(VaultError::InvalidTwoFactorSecret)
        ));
        assert!(matches!(
            vault.unlock(MASTER, Some("123456")),
            Err(VaultError::InvalidTwoFactorSecret)
        ));
        assert!(vault.is_locked());
    }
}

#[test]
fn two_factor_gates_unlock() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    assert!(!vault.two_factor_enabled());

    let setup = vault.enable_two_factor("me@x.com").unwrap();
    assert!(setup.provisioning_uri.starts_with("otpauth://totp/EVOLS:me@x.com?secret="));
    assert!(!vault.two_factor_enabled());
    assert!(matches!(
        vault.confirm_two_factor("abcdef"),
        Err(VaultError::InvalidTwoFactorCode)
    ));
    let code = totp::current_code(&setup.secret).unwrap();
    vault.confirm_two_factor(&code).unwrap();
    assert!(vault.two_factor_enabled());
    assert_eq!(
        std::fs::read_to_string(paths.two_factor_secret()).unwrap(),
        setup.secret
    );
    vault.lock();

    assert!(matches!(
        vault.unlock(MASTER, None),
        Err(VaultError::TwoFactorRequired)
    ));
    assert!(matches!(
        vault.unlock("wrong", Some(&code)),
        Err(VaultError::WrongMasterPassword)
    ));
    assert!(matches!(
        vault.unlock(MASTER, Some("12345")),
        Err(VaultError::InvalidTwoFactorCode)
    ));
    assert!(vault.is_locked());

    let code = totp::current_code(&setup.secret).unwrap();
    vault.unlock(MASTER, Some(&code)).unwrap();
    vault.disable_two_factor(&code).unwrap();
    assert!(!vault.two_factor_enabled());
    vault.lock();
    vault.unlock(MASTER, None).unwrap();
}

#[test]
fn imported_two_factor_secret_is_validated() {
    let dir = tempdir().unwrap();
    let mut vault = Vault::create(VaultPaths::new(dir.path()), MASTER).unwrap();
    assert!(matches!(
        vault.enable_two_factor_with_secret("me", "not base32!"),
        Err(VaultError::InvalidTwoFactorSecret)
    ));
    let setup = vault
        .enable_two_factor_with_secret("me", "gezd gnbv gy3t qojq gezd gnbv gy3t qojq")
        .unwrap();
    assert_eq!(setup.secret, "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ");
}

#[test]
fn audit_reports_undecryptable_records_individually() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    vault.add(&NewRecord::new("weak", "password")).unwrap();
    vault.add(&NewRecord::new("medium", MASTER)).unwrap();
    vault
        .add(&NewRecord::new("strong", "Abcdefghijklmnopqrstuvwxyz1!"))
        .unwrap();

    let foreign = MasterKey::generate();
    RecordStore::open(&paths.database())
        .unwrap()
        .add(&foreign, &NewRecord::new("foreign", "x"))
        .unwrap();

    let report = vault.strength_report().unwrap();
    assert_eq!((report.weak, report.medium, report.strong, report.failed), (1, 1, 1, 1));
    let failed = report.entries.iter().find(|e| e.title == "foreign").unwrap();
    assert!(failed.score.is_none());
    assert!(failed.error.as_deref().unwrap().contains("could not be decrypted"));
}

#[test]
fn backup_snapshot_of_a_live_vault() {
    let dir = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    let id = vault.add(&gmail()).unwrap();

    let (snapshot, manifest) = vault.backup(Some(dest.path())).unwrap();
    assert_eq!(manifest.files.len(), 3);
    assert!(verify_backup(&snapshot).unwrap());

    // The snapshot is a working vault on its own.
    let mut restored = Vault::open(VaultPaths::new(&snapshot)).unwrap();
    restored.unlock(MASTER, None).unwrap();
    assert_eq!(restored.get(id).unwrap().password, "hunter2");
}

#[test]
fn default_backup_location_is_inside_the_data_dir() {
    let dir = tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let mut vault = Vault::create(paths.clone(), MASTER).unwrap();
    let (snapshot, _) = vault.backup(None).unwrap();
    assert!(snapshot.starts_with(paths.backups()));
}
