use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Salt must be {expected} bytes, got {actual}")]
    InvalidSaltLength { expected: usize, actual: usize },

    #[error("Encryption failed")]
    Encryption,

    #[error("Authentication failed (wrong key or tampered ciphertext)")]
    AuthenticationFailure,

    #[error("Record {id}: field `{field}` could not be decrypted under the current key")]
    DecryptionFailure { id: i64, field: &'static str },

    #[error("Record not found: {0}")]
    RecordNotFound(i64),

    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Master password must not be empty")]
    EmptyMasterPassword,

    #[error("Vault is locked; unlock with the master password first")]
    SessionLocked,

    #[error("Wrong master password")]
    WrongMasterPassword,

    #[error("Vault files are missing or corrupted in {0}")]
    VaultMissing(String),

    #[error("A vault already exists in {0}")]
    VaultAlreadyExists(String),

    #[error("Two-factor code required")]
    TwoFactorRequired,

    #[error("Invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("No two-factor setup is pending")]
    TwoFactorNotPending,

    #[error("Two-factor secret is empty or not valid base32")]
    InvalidTwoFactorSecret,

    #[error("Invalid password policy: {0}")]
    InvalidPolicy(String),

    #[error("Master password change was interrupted; records are already under the new password")]
    RekeyIncomplete,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;
