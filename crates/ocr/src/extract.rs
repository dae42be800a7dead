use std::collections::HashSet;
use std::sync::OnceLock;

use phonescan_core::{ExtractConfig, PhoneNumber};
use regex::Regex;

use crate::types::Candidate;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// Line breaks always split. Otherwise only digits, `+ ( ) . -` and whitespace
// survive; letters and other punctuation are hard breaks between candidates.
// `[0-9]` rather than `\d`: the latter would admit non-ASCII digits.
re!(re_separator, r"[\n\r]|[^0-9+().\-\s]");

// ── Public extraction API ─────────────────────────────────────────────────────

/// Turns noisy recognized text into validated phone numbers.
///
/// This is a heuristic, not a numbering-plan grammar: a chunk qualifies on
/// digit count and digit density alone.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    config: ExtractConfig,
}

impl Extractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Validated numbers in first-seen order, duplicates removed. Never fails;
    /// empty or hopeless input yields an empty vec.
    pub fn extract(&self, raw: &str) -> Vec<PhoneNumber> {
        let mut seen = HashSet::new();
        self.candidates(raw)
            .into_iter()
            .filter(|c| self.accepts(c))
            .filter(|c| seen.insert(c.text.clone()))
            .map(|c| PhoneNumber::new(c.text))
            .collect()
    }

    /// Every chunk long enough to be worth scoring, accepted or not.
    pub fn candidates(&self, raw: &str) -> Vec<Candidate> {
        re_separator()
            .split(raw)
            .filter(|chunk| chunk.trim().chars().count() >= self.config.min_chunk_len)
            .map(Candidate::new)
            .collect()
    }

    pub fn accepts(&self, candidate: &Candidate) -> bool {
        let digits = candidate.digit_count;
        if digits < self.config.min_digits || digits > self.config.max_digits {
            tracing::trace!(text = %candidate.text, digits, "rejected: digit count");
            return false;
        }
        if candidate.density() <= self.config.min_density {
            tracing::trace!(
                text = %candidate.text,
                density = candidate.density(),
                "rejected: sparse digits"
            );
            return false;
        }
        true
    }
}

/// Extract with the default heuristics (7–16 digits, density above 0.4).
pub fn extract_numbers(raw: &str) -> Vec<PhoneNumber> {
    Extractor::default().extract(raw)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
