use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const PUNCTUATION: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

pub const DEFAULT_LENGTH: usize = 16;
pub const MIN_LENGTH: usize = 4;
pub const MAX_LENGTH: usize = 1024;

/// Character classes and length for [`generate`]. Lowercase is always used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub length: usize,
    pub uppercase: bool,
    pub digits: bool,
    pub punctuation: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            uppercase: true,
            digits: true,
            punctuation: true,
        }
    }
}

impl PasswordPolicy {
    fn classes(&self) -> Vec<&'static [u8]> {
        let mut classes = vec![LOWERCASE];
        if self.uppercase {
            classes.push(UPPERCASE);
        }
        if self.digits {
            classes.push(DIGITS);
        }
        if self.punctuation {
            classes.push(PUNCTUATION);
        }
        classes
    }
}

/// Random password containing at least one character of every enabled class.
pub fn generate(policy: &PasswordPolicy) -> Result<String> {
    let classes = policy.classes();
    if policy.length < MIN_LENGTH {
        return Err(VaultError::InvalidPolicy(format!(
            "length must be at least {MIN_LENGTH}"
        )));
    }
    if policy.length > MAX_LENGTH {
        return Err(VaultError::InvalidPolicy(format!(
            "length must be at most {MAX_LENGTH}"
        )));
    }
    if policy.length < classes.len() {
        return Err(VaultError::InvalidPolicy(format!(
            "length {} cannot fit {} character classes",
            policy.length,
            classes.len()
        )));
    }

    let mut rng = OsRng;
    let pool: Vec<u8> = classes.iter().flat_map(|c| c.iter().copied()).collect();
    let mut chars = Zeroizing::new(Vec::with_capacity(policy.length));

    for class in &classes {
        if let Some(ch) = class.choose(&mut rng) {
            chars.push(*ch);
        }
    }
    while chars.len() < policy.length {
        if let Some(ch) = pool.choose(&mut rng) {
            chars.push(*ch);
        }
    }
    chars.shuffle(&mut rng);

    Ok(chars.iter().map(|b| *b as char).collect())
}
