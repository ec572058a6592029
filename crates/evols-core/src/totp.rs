//! Time-based one-time passwords (RFC 6238, HMAC-SHA1).
//!
//! The secret is persisted as raw base32 text in `2fa_secret.key`; the file's
//! presence is what makes the second factor mandatory at unlock.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DIGITS: u32 = 6;
pub const PERIOD_SECS: u64 = 30;
pub const SECRET_LEN: usize = 20;
pub const ISSUER: &str = "EVOLS";

/// Steps either side of "now" still accepted.
const SKEW_STEPS: i64 = 1;

/// Fresh 160-bit secret, base32 without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// `otpauth://` URI for authenticator apps.
pub fn provisioning_uri(secret: &str, account: &str) -> String {
    format!(
        "otpauth://totp/{ISSUER}:{}?secret={}&issuer={ISSUER}",
        percent_encode(account),
        normalize_secret(secret)
    )
}

/// Code for the step containing `unix_secs`. `None` if the secret is not base32.
pub fn code_at(secret: &str, unix_secs: u64) -> Option<String> {
    hotp(secret, unix_secs / PERIOD_SECS, DIGITS)
}

pub fn current_code(secret: &str) -> Option<String> {
    code_at(secret, now_secs())
}

/// Check `code` against the current step and its neighbours.
pub fn verify(secret: &str, code: &str) -> bool {
    verify_at(secret, code, now_secs())
}

pub fn verify_at(secret: &str, code: &str, unix_secs: u64) -> bool {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let step = (unix_secs / PERIOD_SECS) as i64;
    (-SKEW_STEPS..=SKEW_STEPS).any(|offset| {
        let counter = step + offset;
        counter >= 0 && hotp(secret, counter as u64, DIGITS).as_deref() == Some(code)
    })
}

fn hotp(secret: &str, counter: u64, digits: u32) -> Option<String> {
    let key = BASE32_NOPAD
        .decode(normalize_secret(secret).as_bytes())
        .ok()?;
    let mut mac = Hmac::<Sha1>::new_from_slice(&key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    let value = binary % 10u32.pow(digits);
    Some(format!("{value:0width$}", width = digits as usize))
}

/// Uppercase, with whitespace and padding removed.
pub fn normalize_secret(secret: &str) -> String {
    secret
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace() && *ch != '=')
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'@' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
