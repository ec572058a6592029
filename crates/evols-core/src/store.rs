//! SQLite record store.
//!
//! Sensitive columns (`username`, `password`, `notes`) hold field-cipher
//! ciphertext; everything else is plaintext so listing and searching never
//! need the key. The store does not own the key: every call that touches a
//! sensitive column borrows it from the caller.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, DatabaseName, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cipher::{decrypt_field, encrypt_field};
use crate::error::{Result, VaultError};
use crate::kdf::MasterKey;
use crate::models::{NewRecord, Record, RecordSummary, RecordUpdate};

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

/// Timestamp format SQLite's `datetime('now')` produces (older files).
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const RECORD_COLUMNS: &str = "id, title, username, password, url, category, notes, folder, date_created, date_modified";

pub struct RecordStore {
    conn: Connection,
}

/// Row exactly as stored, sensitive columns still encrypted.
struct StoredRow {
    id: i64,
    title: String,
    username: String,
    password: String,
    url: String,
    category: String,
    notes: String,
    folder: Option<String>,
    date_created: Option<String>,
    date_modified: Option<String>,
}

impl RecordStore {
    /// Open or create the record database at `path`, upgrading older schemas.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA synchronous = FULL;
             PRAGMA secure_delete = ON;",
        )?;
        let mut store = Self {
            conn,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current: i32 = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current < 1 {
            self.migrate_v1()?;
        }
        if current < 2 {
            self.migrate_v2()?;
        }
        if current < SCHEMA_VERSION {
            debug!(from = current, to = SCHEMA_VERSION, "record store schema upgraded");
        }
        Ok(())
    }

    /// Schema version 1 - the original `passwords` table.
    ///
    /// `IF NOT EXISTS` keeps rows written before versioning was introduced.
    fn migrate_v1(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS passwords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                username TEXT,
                password TEXT NOT NULL,
                url TEXT,
                category TEXT,
                notes TEXT,
                date_created TEXT,
                date_modified TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_passwords_title ON passwords(title COLLATE NOCASE);

            INSERT OR REPLACE INTO schema_version (version) VALUES (1);
            "#,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Schema version 2 - nullable `folder` column.
    fn migrate_v2(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        let has_folder = {
            let mut stmt = tx.prepare("PRAGMA table_info(passwords)")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names.iter().any(|name| name == "folder")
        };
        if !has_folder {
            tx.execute("ALTER TABLE passwords ADD COLUMN folder TEXT", [])?;
        }
        tx.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_passwords_folder ON passwords(folder);
             INSERT OR REPLACE INTO schema_version (version) VALUES (2);",
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?)
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Insert a record, encrypting its sensitive fields. Returns the new id.
    pub fn add(&self, key: &MasterKey, record: &NewRecord) -> Result<i64> {
        validate_title(&record.title)?;
        validate_password(&record.password)?;

        let username = encrypt_field(key, &record.username)?;
        let password = encrypt_field(key, &record.password)?;
        let notes = encrypt_field(key, &record.notes)?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO passwords (title, username, password, url, category, notes, folder, date_created, date_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                record.title,
                username,
                password,
                record.url,
                record.category,
                notes,
                normalize_folder(record.folder.as_deref()),
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Fetch and decrypt one record.
    pub fn get(&self, key: &MasterKey, id: i64) -> Result<Record> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM passwords WHERE id = ?1"),
                params![id],
                stored_row,
            )
            .optional()?
            .ok_or(VaultError::RecordNotFound(id))?;

        Ok(Record {
            id: row.id,
            username: decrypt_column(key, row.id, "username", &row.username)?,
            password: decrypt_column(key, row.id, "password", &row.password)?,
            notes: decrypt_column(key, row.id, "notes", &row.notes)?,
            date_created: parse_timestamp(row.date_created.as_deref()),
            date_modified: parse_timestamp(row.date_modified.as_deref()),
            title: row.title,
            url: row.url,
            category: row.category,
            folder: row.folder,
        })
    }

    /// All records, non-sensitive columns only, ordered by title.
    pub fn list(&self) -> Result<Vec<RecordSummary>> {
        self.summaries("", [])
    }

    /// Case-insensitive substring search over title, category and url.
    pub fn search(&self, query: &str) -> Result<Vec<RecordSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return self.list();
        }
        let pattern = format!("%{}%", escape_like(query));
        self.summaries(
            r"WHERE title LIKE ?1 ESCAPE '\' OR category LIKE ?1 ESCAPE '\' OR url LIKE ?1 ESCAPE '\'",
            [pattern],
        )
    }

    /// Records filed under `folder`; `None` selects records without a folder.
    pub fn list_folder(&self, folder: Option<&str>) -> Result<Vec<RecordSummary>> {
        match normalize_folder(folder) {
            Some(name) => self.summaries("WHERE folder = ?1", [name]),
            None => self.summaries("WHERE folder IS NULL OR folder = ''", []),
        }
    }

    fn summaries<const N: usize>(&self, filter: &str, args: [String; N]) -> Result<Vec<RecordSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, title, COALESCE(category, '') FROM passwords {filter}
             ORDER BY title COLLATE NOCASE ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(RecordSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    category: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Distinct folder names in use, sorted.
    pub fn folders(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT folder FROM passwords
             WHERE folder IS NOT NULL AND folder <> ''
             ORDER BY folder COLLATE NOCASE",
        )?;
        let folders = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(folders)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM passwords", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Apply a partial update. Supplied sensitive fields are re-encrypted;
    /// `date_modified` is always bumped. Returns whether a row was affected.
    pub fn update(&self, key: &MasterKey, id: i64, update: &RecordUpdate) -> Result<bool> {
        if let Some(title) = &update.title {
            validate_title(title)?;
        }
        if let Some(password) = &update.password {
            validate_password(password)?;
        }

        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(title) = &update.title {
            columns.push("title");
            values.push(Value::Text(title.clone()));
        }
        if let Some(username) = &update.username {
            columns.push("username");
            values.push(Value::Text(encrypt_field(key, username)?));
        }
        if let Some(password) = &update.password {
            columns.push("password");
            values.push(Value::Text(encrypt_field(key, password)?));
        }
        if let Some(url) = &update.url {
            columns.push("url");
            values.push(Value::Text(url.clone()));
        }
        if let Some(category) = &update.category {
            columns.push("category");
            values.push(Value::Text(category.clone()));
        }
        if let Some(notes) = &update.notes {
            columns.push("notes");
            values.push(Value::Text(encrypt_field(key, notes)?));
        }
        if let Some(folder) = &update.folder {
            columns.push("folder");
            values.push(match normalize_folder(folder.as_deref()) {
                Some(name) => Value::Text(name),
                None => Value::Null,
            });
        }
        columns.push("date_modified");
        values.push(Value::Text(Utc::now().to_rfc3339()));

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        values.push(Value::Integer(id));
        let sql = format!(
            "UPDATE passwords SET {assignments} WHERE id = ?{}",
            values.len()
        );

        let affected = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(affected > 0)
    }

    pub fn move_to_folder(&self, id: i64, folder: Option<&str>) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE passwords SET folder = ?1, date_modified = ?2 WHERE id = ?3",
            params![normalize_folder(folder), Utc::now().to_rfc3339(), id],
        )?;
        Ok(affected > 0)
    }

    /// Hard delete. There is no tombstone.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM passwords WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Re-encrypt every record from `old_key` to `new_key` in one transaction.
    ///
    /// Any record that fails to decrypt aborts the pass and rolls back every
    /// row, so the table is never left under a mix of keys.
    pub fn rekey(&mut self, old_key: &MasterKey, new_key: &MasterKey) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let rows = {
            let mut stmt = tx.prepare(
                "SELECT id, COALESCE(username, ''), password, COALESCE(notes, '') FROM passwords ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for (id, username, password, notes) in &rows {
            let username = reencrypt(old_key, new_key, *id, "username", username)?;
            let password = reencrypt(old_key, new_key, *id, "password", password)?;
            let notes = reencrypt(old_key, new_key, *id, "notes", notes)?;
            tx.execute(
                "UPDATE passwords SET username = ?1, password = ?2, notes = ?3 WHERE id = ?4",
                params![username, password, notes, id],
            )?;
        }
        tx.commit()?;

        info!(records = rows.len(), "record store re-encrypted under new key");
        Ok(rows.len())
    }

    /// Which key are the stored records under?
    ///
    /// Returns `None` when there is nothing to probe (no stored passwords),
    /// otherwise whether the lowest-id password decrypts under `key`.
    pub fn key_matches(&self, key: &MasterKey) -> Result<Option<bool>> {
        let probe: Option<String> = self
            .conn
            .query_row(
                "SELECT password FROM passwords WHERE password <> '' ORDER BY id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(probe.map(|ct| decrypt_field(key, &ct).is_ok()))
    }

    /// Consistent online copy of the database to `dest`.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        self.conn.backup(DatabaseName::Main, dest, None)?;
        Ok(())
    }
}

fn stored_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        id: row.get(0)?,
        title: row.get(1)?,
        username: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        password: row.get(3)?,
        url: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        category: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        notes: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        folder: row.get::<_, Option<String>>(7)?.filter(|f| !f.is_empty()),
        date_created: row.get(8)?,
        date_modified: row.get(9)?,
    })
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(VaultError::EmptyTitle);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(VaultError::EmptyPassword);
    }
    Ok(())
}

fn decrypt_column(key: &MasterKey, id: i64, field: &'static str, ciphertext: &str) -> Result<String> {
    decrypt_field(key, ciphertext).map_err(|err| match err {
        VaultError::AuthenticationFailure => VaultError::DecryptionFailure { id, field },
        other => other,
    })
}

fn reencrypt(
    old_key: &MasterKey,
    new_key: &MasterKey,
    id: i64,
    field: &'static str,
    ciphertext: &str,
) -> Result<String> {
    let plain = Zeroizing::new(decrypt_column(old_key, id, field, ciphertext)?);
    encrypt_field(new_key, &plain)
}

fn normalize_folder(folder: Option<&str>) -> Option<String> {
    folder
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_owned)
}

fn escape_like(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// RFC 3339 for rows we write, `datetime('now')` text for older rows.
/// Missing or unreadable values fall back to the Unix epoch.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return DateTime::<Utc>::default();
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    match NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT) {
        Ok(naive) => naive.and_utc(),
        Err(_) => {
            debug!(value = raw, "unreadable record timestamp");
            DateTime::<Utc>::default()
        }
    }
}
