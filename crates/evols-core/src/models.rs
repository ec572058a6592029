//! Record models.
//!
//! `Record` is the decrypted, in-memory view of one row of `passwords`.
//! Ciphertext never leaves the store module; plaintext never goes back in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One credential, with sensitive fields decrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct Record {
    #[zeroize(skip)]
    pub id: i64,
    #[zeroize(skip)]
    pub title: String,
    pub username: String,
    pub password: String,
    #[zeroize(skip)]
    pub url: String,
    #[zeroize(skip)]
    pub category: String,
    pub notes: String,
    #[zeroize(skip)]
    pub folder: Option<String>,
    #[zeroize(skip)]
    pub date_created: DateTime<Utc>,
    #[zeroize(skip)]
    pub date_modified: DateTime<Utc>,
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .field("url", &self.url)
            .field("category", &self.category)
            .field("notes", &"<redacted>")
            .field("folder", &self.folder)
            .field("date_created", &self.date_created)
            .field("date_modified", &self.date_modified)
            .finish()
    }
}

/// Non-sensitive projection used for listings. Never requires decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: i64,
    pub title: String,
    pub category: String,
}

/// Input for `RecordStore::add`. `title` and `password` are required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRecord {
    pub title: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub category: String,
    pub notes: String,
    pub folder: Option<String>,
}

impl NewRecord {
    pub fn new(title: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Partial update. `None` leaves the column untouched.
///
/// `folder` is doubly optional: `Some(None)` clears the folder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordUpdate {
    pub title: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub notes: Option<String>,
    pub folder: Option<Option<String>>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.url.is_none()
            && self.category.is_none()
            && self.notes.is_none()
            && self.folder.is_none()
    }
}
