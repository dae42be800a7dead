use serde::{Deserialize, Serialize};
use std::fmt;

/// A phone number that passed the extraction heuristics, kept exactly as it
/// appeared in the recognized text (spacing and punctuation included).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Wrap an already-validated string. Validation lives with the extractor.
    pub fn new(text: impl Into<String>) -> Self {
        PhoneNumber(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Digits and `+` only, suitable for a dialer or the clipboard.
    pub fn dial_string(&self) -> String {
        self.0.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect()
    }

    pub fn tel_uri(&self) -> String {
        format!("tel:{}", self.dial_string())
    }

    pub fn digit_count(&self) -> usize {
        self.0.chars().filter(char::is_ascii_digit).count()
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
