//! Verification token: a known plaintext encrypted under the master key.
//!
//! Login is gated on this token alone, so an empty vault is validated just
//! like a full one.

use crate::cipher::{decrypt_field, encrypt_field};
use crate::error::Result;
use crate::kdf::MasterKey;

pub const VERIFICATION_PLAINTEXT: &str = "EVOLS_VERIFICATION_TOKEN_2024";

/// Produce the token persisted as `verify.token`.
pub fn create_token(key: &MasterKey) -> Result<String> {
    encrypt_field(key, VERIFICATION_PLAINTEXT)
}

/// True iff `token` decrypts under `key` to exactly [`VERIFICATION_PLAINTEXT`].
///
/// Decryption errors and content mismatches both yield `false`.
pub fn verify_token(key: &MasterKey, token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return false;
    }
    matches!(decrypt_field(key, token), Ok(plain) if plain == VERIFICATION_PLAINTEXT)
}
