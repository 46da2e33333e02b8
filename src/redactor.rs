//! L4 PII redaction: replace recognizable personal data with
//! `[REDACTED:<KIND>]` sentinel tokens before a message reaches its
//! destination. Runs only on messages that already cleared L3 — a
//! blocked message never reaches this layer (there's nothing to redact
//! in an empty `safe_input`).
//!
//! Pattern-based, not an NLP model: false negatives on obfuscated PII are
//! expected and acceptable, false positives are tolerated in favor of
//! over-redaction. The function is idempotent — redacting already
//! redacted text is a no-op — since `[REDACTED:EMAIL]` itself matches
//! none of the patterns below.

use once_cell::sync::Lazy;
use regex::Regex;

// Order matters below: the national-id pattern runs before the
// credit-card pattern so a 9-digit SSN-shaped run isn't swallowed by
// the looser digit-run credit-card match first.
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap());
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\+?1[ -]?)?\(?\d{3}\)?[ -]?\d{3}[ -]?\d{4}\b").unwrap());
static NATIONAL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

pub fn redact(text: &str) -> String {
    let mut out = EMAIL.replace_all(text, "[REDACTED:EMAIL]").to_string();
    out = NATIONAL_ID.replace_all(&out, "[REDACTED:NATIONAL_ID]").to_string();
    out = CREDIT_CARD.replace_all(&out, "[REDACTED:CREDIT_CARD]").to_string();
    out = PHONE.replace_all(&out, "[REDACTED:PHONE]").to_string();
    out
}

/// The L4 contract: `{has_pii, entities_found, redacted_text}`.
#[derive(Debug, Clone)]
pub struct RedactionOutcome {
    pub has_pii: bool,
    pub entities_found: Vec<String>,
    pub redacted_text: String,
}

/// Scan and redact in one pass, reporting which entity kinds were found
/// (lower-cased, e.g. `"email"`) without re-scanning the redacted output.
pub fn detect_and_redact(text: &str) -> RedactionOutcome {
    let mut entities_found = Vec::new();
    for (kind, count) in redaction_summary(text) {
        if count > 0 {
            entities_found.push(kind.to_lowercase());
        }
    }
    RedactionOutcome {
        has_pii: !entities_found.is_empty(),
        redacted_text: redact(text),
        entities_found,
    }
}

/// What kinds of PII were found and how many times, for audit logging
/// without re-scanning the redacted output.
pub fn redaction_summary(text: &str) -> Vec<(&'static str, usize)> {
    let mut summary = Vec::new();
    let counts = [
        ("EMAIL", EMAIL.find_iter(text).count()),
        ("NATIONAL_ID", NATIONAL_ID.find_iter(text).count()),
        ("CREDIT_CARD", CREDIT_CARD.find_iter(text).count()),
        ("PHONE", PHONE.find_iter(text).count()),
    ];
    for (kind, count) in counts {
        if count > 0 {
            summary.push((kind, count));
        }
    }
    summary
}
