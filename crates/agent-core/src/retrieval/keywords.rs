use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z0-9]+\b").expect("valid regex"));

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "to", "from", "for", "of", "in", "on", "at", "and", "or", "but", "with",
    "this", "that", "these", "those", "is", "are", "was", "were", "be", "been", "being", "have",
    "has", "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "i",
    "you", "he", "she", "it", "we", "they", "my", "your", "his", "her", "its", "our", "their",
    "please", "now", "go", "file",
];

/// Matching keywords of `text`: lowercase alphanumeric words longer than two
/// characters that are not stop words, first occurrence order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = HashSet::new();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|word| word.len() > 2 && !STOP_WORDS.contains(word))
        .filter(|word| seen.insert(word.to_string()))
        .map(str::to_string)
        .collect()
}

/// Number of `keywords` contained in `haystack` (case-insensitive).
pub fn keyword_hits(keywords: &[String], haystack: &str) -> usize {
    let haystack = haystack.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| !keyword.is_empty() && haystack.contains(keyword.as_str()))
        .count()
}
