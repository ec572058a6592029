//! evols-core: encryption and storage layer of the EVOLS password vault
//!
//! # Encryption strategy
//! - The master key is derived from the master password with
//!   PBKDF2-HMAC-SHA256 (480,000 iterations) over a per-vault 16-byte salt.
//! - Sensitive columns (username, password, notes) are stored as
//!   XChaCha20-Poly1305 ciphertext, base64-encoded. Titles, urls, categories
//!   and folders stay in plaintext so listing and search need no key.
//! - A verification token (a known constant encrypted under the key) gates
//!   login, so an empty vault rejects a wrong password too.
//!
//! # Module layout
//! - `kdf`          : master key derivation and salts
//! - `cipher`       : per-field authenticated encryption
//! - `verification` : verification token create/verify
//! - `store`        : SQLite record table with migrations and rekey
//! - `vault`        : locked/unlocked session, auto-lock, password change
//! - `totp`         : optional RFC 6238 second factor
//! - `strength`     : password scoring
//! - `generator`    : random password generation
//! - `backup`       : consistent snapshots of the vault files
//! - `paths`        : on-disk layout
//! - `settings`     : persisted preferences
//! - `error`        : unified error type

pub mod backup;
pub mod cipher;
pub mod error;
pub mod generator;
pub mod kdf;
pub mod models;
pub mod paths;
pub mod settings;
pub mod store;
pub mod strength;
pub mod totp;
pub mod vault;
pub mod verification;

pub use error::{Result, VaultError};
pub use models::{NewRecord, Record, RecordSummary, RecordUpdate};
pub use paths::VaultPaths;
pub use settings::AppSettings;
pub use store::RecordStore;
pub use vault::Vault;
