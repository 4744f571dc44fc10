//! Text normalization and token-set similarity.
//!
//! Fingerprint deduplication works on normalized token sets, never on raw
//! prose. Normalization is deliberately aggressive: the goal is to compare
//! what a sentence *says*, not how it is phrased.

use std::collections::BTreeSet;

/// Jaccard similarity above which two `new_information` sentences are
/// considered the same revelation.
pub const INFO_DUPLICATE_THRESHOLD: f64 = 0.65;

/// Articles, common pronouns, and modal auxiliaries dropped during
/// normalization. Tokens of length ≤ 2 are dropped before this list applies.
const STOPWORDS: &[&str] = &[
    "the", "and", "but", "for", "nor", "yet", "she", "him", "her", "his",
    "hers", "its", "our", "ours", "your", "yours", "their", "theirs", "they",
    "them", "you", "are", "was", "were", "been", "being", "can", "could",
    "will", "would", "shall", "should", "may", "might", "must", "this",
    "that", "these", "those", "with", "from", "into", "not", "does", "did",
    "have", "has", "had",
];

/// Normalize text into a set of comparison tokens.
///
/// Lowercases, maps every non-alphanumeric character to a space, collapses
/// whitespace, drops tokens of length ≤ 2, and drops stopwords.
pub fn normalize_tokens(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .filter(|t| !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity of two token sets.
///
/// Both empty → 1.0; exactly one empty → 0.0; otherwise |A∩B| / |A∪B|.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Whether two `new_information` sentences reveal the same thing.
pub fn is_information_duplicate(a: &str, b: &str) -> bool {
    jaccard(&normalize_tokens(a), &normalize_tokens(b)) > INFO_DUPLICATE_THRESHOLD
}

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Truncate text to at most `max_words` words, preserving original spacing
/// up to the cut point.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let mut seen = 0usize;
    let mut in_word = false;
    for (idx, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            seen += 1;
            if seen > max_words {
                return text[..idx].trim_end().to_string();
            }
        }
    }
    text.to_string()
}
