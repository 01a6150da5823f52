//! PII Detector Module
//!
//! Pattern rules that pick email addresses and labelled passwords out of
//! OCR text. Matching is deliberately loose: this is a heuristic scanner, so
//! nothing is validated and OCR noise is accepted as-is.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// `local-part@domain`, no TLD required.
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+").unwrap());

/// The literal keyword, an optional colon, optional whitespace and one token.
static PASSWORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"password:?\s*\S+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiCategory {
    Email,
    Password,
}

/// A piece of text matched by one of the rules, kept exactly as recognized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PiiMatch {
    pub category: PiiCategory,
    pub value: String,
}

impl PiiMatch {
    pub fn email(value: impl Into<String>) -> Self {
        PiiMatch {
            category: PiiCategory::Email,
            value: value.into(),
        }
    }

    pub fn password(value: impl Into<String>) -> Self {
        PiiMatch {
            category: PiiCategory::Password,
            value: value.into(),
        }
    }
}

/// Applies the email and password rules to a block of text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiDetector;

impl PiiDetector {
    pub fn new() -> Self {
        PiiDetector
    }

    /// Returns every email match in scan order, followed by every password
    /// match in scan order. Both passes run over the same text.
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let emails = EMAIL_PATTERN
            .find_iter(text)
            .map(|m| PiiMatch::email(m.as_str()));
        let passwords = PASSWORD_PATTERN
            .find_iter(text)
            .map(|m| PiiMatch::password(m.as_str()));
        emails.chain(passwords).collect()
    }
}
