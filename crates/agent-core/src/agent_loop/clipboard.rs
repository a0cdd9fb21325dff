//! Best-effort capture of copied values.
//!
//! The environment never reports clipboard contents, so the value is read
//! from the model's own reasoning ("copied US66254", "the ID is CCR-12").
//! A miss is normal and never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use waymark_core_types::Action;

static COPIED_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:copied|copy|ID is|ID:)\s*["']?([A-Z]{2}\d+|[A-Z0-9\-]+)"#)
        .expect("copied value regex")
});
static KNOWN_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(US\d{5,}|CCR-\d+)\b").expect("known id regex"));

/// Value a step copied, if its reasoning names one.
///
/// Copy key combinations use the general pattern; any step whose reasoning
/// talks about copying also matches well-known identifier shapes, unless the
/// value was already captured earlier in the session.
pub fn detect_copied_value(
    action: Option<&Action>,
    reasoning: Option<&str>,
    history: &[String],
) -> Option<String> {
    let reasoning = reasoning?.trim();
    if reasoning.is_empty() {
        return None;
    }
    if action.is_some_and(Action::is_copy) {
        let explicit = COPIED_VALUE_RE
            .captures_iter(reasoning)
            .map(|caps| caps[1].trim_matches('-').to_string())
            .find(|value| value.chars().any(|c| c.is_ascii_digit()));
        if explicit.is_some() {
            return explicit;
        }
    }
    if !reasoning.to_lowercase().contains("cop") {
        return None;
    }
    KNOWN_ID_RE
        .captures(reasoning)
        .map(|caps| caps[1].to_string())
        .filter(|value| !history.contains(value))
}
