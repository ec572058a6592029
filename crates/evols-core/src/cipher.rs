//! Per-field authenticated encryption
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce) keyed by the 32-byte master key.
//!
//! Stored field format (base64 URL-safe, no padding):
//!   [ nonce (24 bytes) | ciphertext + tag (16 bytes) ]
//!
//! Empty strings are never encrypted: `""` maps to `""` in both directions so
//! a logically absent field never carries a ciphertext.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::kdf::MasterKey;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const FIELD_AAD: &[u8] = b"evols-field-v1";

/// Encrypt one field value under `key`.
pub fn encrypt_field(key: &MasterKey, plaintext: &str) -> Result<String> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| VaultError::Encryption)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: FIELD_AAD,
            },
        )
        .map_err(|_| VaultError::Encryption)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Decrypt a value produced by [`encrypt_field`].
///
/// Any failure (wrong key, tampering, truncation, bad encoding) is reported
/// as `AuthenticationFailure`; no partial plaintext is ever returned.
pub fn decrypt_field(key: &MasterKey, ciphertext: &str) -> Result<String> {
    if ciphertext.is_empty() {
        return Ok(String::new());
    }
    let data = URL_SAFE_NO_PAD
        .decode(ciphertext.trim())
        .map_err(|_| VaultError::AuthenticationFailure)?;
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::AuthenticationFailure);
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| VaultError::AuthenticationFailure)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(nonce, Payload { msg: ct, aad: FIELD_AAD })
            .map_err(|_| VaultError::AuthenticationFailure)?,
    );

    std::str::from_utf8(&plaintext)
        .map(str::to_owned)
        .map_err(|_| VaultError::AuthenticationFailure)
}
