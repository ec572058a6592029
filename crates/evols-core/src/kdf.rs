//! Master key derivation
//!
//! `derive`: PBKDF2-HMAC-SHA256 over the master password and the 16-byte
//!   vault salt, producing the 32-byte key used by the field cipher.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::{Result, VaultError};

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Fixed work factor. Changing it invalidates every existing vault.
pub const PBKDF2_ITERATIONS: u32 = 480_000;

/// 32-byte session key derived from the master password. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Wrap existing key material (tests, recovery tooling).
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random key. Only useful where no password is involved.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Vault salt. Not secret; persisted in the clear as `vault.salt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SALT_LEN] = bytes.try_into().map_err(|_| VaultError::InvalidSaltLength {
            expected: SALT_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

/// Generate a fresh random salt (once, at vault creation or rekey).
pub fn generate_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    Salt(salt)
}

/// Derive the master key from a password and a raw salt.
///
/// The salt is taken as a slice because it usually comes straight from disk;
/// anything but exactly 16 bytes is rejected with `InvalidSaltLength`.
pub fn derive(password: &str, salt: &[u8]) -> Result<MasterKey> {
    let salt = Salt::from_slice(salt)?;
    Ok(derive_with_salt(password, &salt))
}

pub fn derive_with_salt(password: &str, salt: &Salt) -> MasterKey {
    let mut output = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut output);
    MasterKey(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = generate_salt();
        let a = derive("correct horse battery staple", salt.as_bytes()).unwrap();
        let b = derive("correct horse battery staple", salt.as_bytes()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_passwords_give_different_keys() {
        let salt = generate_salt();
        let a = derive("pw1", salt.as_bytes()).unwrap();
        let b = derive("pw2", salt.as_bytes()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salts_give_different_keys() {
        let a = derive("pw", generate_salt().as_bytes()).unwrap();
        let b = derive("pw", generate_salt().as_bytes()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn rejects_malformed_salt() {
        let err = derive("pw", &[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            VaultError::InvalidSaltLength { expected: 16, actual: 15 }
        ));
        assert!(derive("pw", &[]).is_err());
        assert!(derive("pw", &[0u8; 32]).is_err());
    }

    #[test]
    fn matches_reference_pbkdf2_output() {
        let key = derive("password", b"saltsaltsaltsalt").unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "9bf054df2da34bfe01c11f242234ede8f1fd04872338e4942f29595272c94ac0"
        );
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = MasterKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "MasterKey(..)");
    }
}
