//! Password strength scoring.
//!
//! A fixed additive rubric on a 0..=100 scale. Scores are advisory only and
//! never block storing a password.

use serde::Serialize;

const KEYBOARD_SEQUENCES: [&str; 4] = ["qwerty", "asdfgh", "123456", "zxcvbn"];

/// Charset sizes used for the entropy estimate.
const LOWER_CHARSET: u32 = 26;
const UPPER_CHARSET: u32 = 26;
const DIGIT_CHARSET: u32 = 10;
const SYMBOL_CHARSET: u32 = 33;

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "123456789", "12345678", "12345", "1234567", "1234567890", "111111",
    "000000", "123123", "654321", "666666", "121212", "password", "password1",
    "password123", "passw0rd", "qwerty", "qwerty123", "qwertyuiop", "1q2w3e4r",
    "1qaz2wsx", "abc123", "iloveyou", "admin", "admin123", "welcome", "welcome1",
    "letmein", "monkey", "dragon", "football", "baseball", "sunshine", "princess",
    "master", "shadow", "superman", "trustno1", "starwars", "login", "hello",
    "freedom", "whatever", "michael", "qazwsx", "zaq12wsx", "asdfghjkl",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthLevel {
    VeryWeak,
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

impl StrengthLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => Self::VeryWeak,
            30..=49 => Self::Weak,
            50..=69 => Self::Medium,
            70..=89 => Self::Strong,
            _ => Self::VeryStrong,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrengthReport {
    pub score: u8,
    pub level: StrengthLevel,
    pub suggestions: Vec<String>,
}

struct Classes {
    lower: bool,
    upper: bool,
    digit: bool,
    symbol: bool,
}

impl Classes {
    fn of(password: &str) -> Self {
        Self {
            lower: password.chars().any(|c| c.is_ascii_lowercase()),
            upper: password.chars().any(|c| c.is_ascii_uppercase()),
            digit: password.chars().any(|c| c.is_ascii_digit()),
            symbol: password.chars().any(|c| !c.is_ascii_alphanumeric()),
        }
    }

    fn count(&self) -> i32 {
        [self.lower, self.upper, self.digit, self.symbol]
            .iter()
            .filter(|present| **present)
            .count() as i32
    }
}

pub fn score(password: &str) -> StrengthReport {
    let len = password.chars().count();
    let mut points: i32 = 0;
    let mut suggestions = Vec::new();

    if len < 8 {
        suggestions.push("Use at least 8 characters".to_owned());
    } else {
        points += (len as i32 * 2).min(30);
    }

    let classes = Classes::of(password);
    points += classes.count() * 10;
    if !classes.lower {
        suggestions.push("Add lowercase letters".to_owned());
    }
    if !classes.upper {
        suggestions.push("Add uppercase letters".to_owned());
    }
    if !classes.digit {
        suggestions.push("Add digits".to_owned());
    }
    if !classes.symbol {
        suggestions.push("Add special characters".to_owned());
    }

    if has_repeated_run(password, 3) {
        points -= 15;
        suggestions.push("Avoid repeating the same character".to_owned());
    }

    let lowered = password.to_lowercase();
    if KEYBOARD_SEQUENCES.iter().any(|seq| lowered.contains(seq)) {
        points -= 15;
        suggestions.push("Avoid keyboard sequences".to_owned());
    }

    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        points -= 30;
        suggestions.push("This password is too common".to_owned());
    }

    let score = points.clamp(0, 100) as u8;
    StrengthReport {
        score,
        level: StrengthLevel::from_score(score),
        suggestions,
    }
}

/// `len * log2(charset)`, charset being the union of the classes present.
pub fn entropy_bits(password: &str) -> f64 {
    let classes = Classes::of(password);
    let charset = [
        (classes.lower, LOWER_CHARSET),
        (classes.upper, UPPER_CHARSET),
        (classes.digit, DIGIT_CHARSET),
        (classes.symbol, SYMBOL_CHARSET),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, size)| size)
    .sum::<u32>();

    if charset == 0 {
        return 0.0;
    }
    password.chars().count() as f64 * f64::from(charset).log2()
}

fn has_repeated_run(password: &str, run: usize) -> bool {
    let mut prev = None;
    let mut count = 0;
    for ch in password.chars() {
        if Some(ch) == prev {
            count += 1;
        } else {
            prev = Some(ch);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }
    false
}
