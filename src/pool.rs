//! Symptom pool: candidate follow-up phrases lifted from knowledge text.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::knowledge::Candidate;

static PHRASE_DELIMITERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;,.\n•\-/()]+").expect("Invalid phrase delimiter regex"));

const MAX_PHRASE_WORDS: usize = 10;

/// Split knowledge text into trimmed fragments of 1..=10 words.
pub fn phrases(text: &str) -> impl Iterator<Item = &str> {
    PHRASE_DELIMITERS
        .split(text)
        .map(str::trim)
        .filter(|frag| {
            let words = frag.split_whitespace().count();
            (1..=MAX_PHRASE_WORDS).contains(&words)
        })
}

/// Up to `max_per_candidate` phrases from each candidate, in candidate order,
/// deduplicated case-insensitively (first spelling wins), capped at `max_total`.
pub fn extract_pool(
    candidates: &[Candidate],
    max_per_candidate: usize,
    max_total: usize,
) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut pool = Vec::new();

    for cand in candidates {
        for phrase in phrases(&cand.knowledge).take(max_per_candidate) {
            if pool.len() >= max_total {
                return pool;
            }
            if seen.insert(phrase.to_lowercase()) {
                pool.push(phrase.to_string());
            }
        }
    }
    pool
}
