//! Input validators for free-text steps

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// Digits accepted in a phone number once formatting is stripped
/// (local number with area code up to full international form).
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 10..=13;

/// Declarative predicate over a raw answer.
///
/// Validators are plain data so a flow stays serializable. `validate` is
/// deterministic and has no side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Validator {
    /// Anything but whitespace
    NonEmpty,
    /// At least `min` characters after trimming
    MinLength { min: usize },
    Email,
    /// Brazilian-style phone: digits plus common formatting characters
    Phone,
    /// Website or social profile URL, scheme optional
    Url,
    /// Custom regular expression the whole trimmed value must match
    Pattern { regex: String },
}

impl Validator {
    pub fn validate(&self, raw: &str) -> bool {
        let value = raw.trim();
        match self {
            Validator::NonEmpty => !value.is_empty(),
            Validator::MinLength { min } => value.chars().count() >= *min,
            Validator::Email => EMAIL_RE.is_match(value),
            Validator::Phone => is_phone(value),
            Validator::Url => URL_RE.is_match(value),
            Validator::Pattern { regex } => {
                compiled(regex).is_some_and(|re| re.is_match(value))
            }
        }
    }

    /// Compile-check a `Pattern` validator. Other validators always compile.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Validator::Pattern { regex } => Regex::new(&anchored(regex))
                .map(|_| ())
                .map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}

fn anchored(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?://)?([\w-]+\.)+[a-z]{2,}(/\S*)?$").unwrap());

/// Compiled `Pattern` validators keyed by source. Broken patterns are cached
/// as `None` so they are not recompiled on every answer either.
static PATTERNS: LazyLock<Mutex<HashMap<String, Option<Arc<Regex>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn compiled(pattern: &str) -> Option<Arc<Regex>> {
    let Ok(mut cache) = PATTERNS.lock() else {
        // Poisoned cache; compile without it
        return Regex::new(&anchored(pattern)).ok().map(Arc::new);
    };
    cache
        .entry(pattern.to_string())
        .or_insert_with(|| Regex::new(&anchored(pattern)).ok().map(Arc::new))
        .clone()
}

fn is_phone(value: &str) -> bool {
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')' | '.');
    if value.is_empty() || !value.chars().all(allowed) {
        return false;
    }
    let digits = value.chars().filter(char::is_ascii_digit).count();
    PHONE_DIGITS.contains(&digits)
}
