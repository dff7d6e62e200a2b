//! PII and compliance screening of evidence and answers.
//!
//! Screening only annotates. Nothing is redacted or blocked; callers decide
//! what to do with the flags.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[\w.-]+@[\w.-]+\.\w{2,4}\b").ok());

static PHONE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}[-.\s]\d{3}[-.\s]\d{4}\b|\(\d{3}\)\s?\d{3}-\d{4}").ok()
});

static SSN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").ok());

const COMPLIANCE_TERMS: &[&str] = &[
    "restatement",
    "earnings risk",
    "regulatory breach",
    "non-compliance",
    "violation",
    "penalty",
    "audit failure",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Email,
    Phone,
    Ssn,
    Compliance,
}

/// A sensitive match and where it was found.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningFlag {
    pub kind: FlagKind,
    pub term: String,
    /// `answer` or the label of the evidence record
    pub source: String,
}

/// Scan `text` and tag every match with `source`.
pub fn screen(text: &str, source: &str) -> Vec<ScreeningFlag> {
    let mut flags = Vec::new();
    let flag = |kind, term: &str| ScreeningFlag {
        kind,
        term: term.to_string(),
        source: source.to_string(),
    };

    for (kind, pattern) in [
        (FlagKind::Email, &EMAIL),
        (FlagKind::Ssn, &SSN),
        (FlagKind::Phone, &PHONE),
    ] {
        if let Some(re) = pattern.as_ref() {
            flags.extend(re.find_iter(text).map(|m| flag(kind, m.as_str())));
        }
    }

    let lower = text.to_lowercase();
    flags.extend(
        COMPLIANCE_TERMS
            .iter()
            .filter(|term| lower.contains(*term))
            .map(|term| flag(FlagKind::Compliance, term)),
    );
    flags
}

/// Screen several labelled texts, returning sorted, deduplicated flags.
pub fn screen_all<'a, I>(texts: I) -> Vec<ScreeningFlag>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut flags: Vec<ScreeningFlag> = texts
        .into_iter()
        .flat_map(|(text, source)| screen(text, source))
        .collect();
    flags.sort();
    flags.dedup();
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_pii() {
        let flags = screen(
            "Contact jane.doe@biomed.com or 555-867-5309. SSN on file: 123-45-6789.",
            "email-101 chunk:0",
        );
        let kinds: Vec<FlagKind> = flags.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FlagKind::Email));
        assert!(kinds.contains(&FlagKind::Phone));
        assert!(kinds.contains(&FlagKind::Ssn));
        assert!(flags.iter().all(|f| f.source == "email-101 chunk:0"));
    }

    #[test]
    fn test_ssn_is_not_a_phone_number() {
        let flags = screen("123-45-6789", "answer");
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, FlagKind::Ssn);
    }

    #[test]
    fn test_compliance_terms_are_case_insensitive() {
        let flags = screen("Helix Pharma requested a Penalty waiver after the audit failure.", "answer");
        let terms: Vec<&str> = flags.iter().map(|f| f.term.as_str()).collect();
        assert_eq!(terms, vec!["penalty", "audit failure"]);
    }

    #[test]
    fn test_clean_text() {
        assert!(screen("Revenue grew in the third quarter.", "answer").is_empty());
    }

    #[test]
    fn test_screen_all_dedups() {
        let flags = screen_all([("penalty clause", "answer"), ("penalty clause", "answer")]);
        assert_eq!(flags.len(), 1);
    }
}
