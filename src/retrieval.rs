//! Sparse lexical retriever (Okapi BM25) over a [`KnowledgeMap`].
//!
//! This is an explicitly constructed service: build it once from a
//! knowledge map and share it behind an `Arc<dyn Retriever>`. Dense
//! retrieval is out of scope; hosts with an embedding index implement
//! [`Retriever`] themselves.

use std::cmp::Ordering;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::knowledge::{KnowledgeMap, Retriever};

/// Query used when the caller passes an empty or token-free query.
pub const FALLBACK_QUERY: &str = "symptoms";

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("Invalid word regex"));

/// Lower-cased `\w+` tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

#[derive(Debug, Clone)]
struct Document {
    label: String,
    term_freqs: HashMap<String, usize>,
    len: usize,
}

#[derive(Debug, Clone)]
pub struct LexicalRetriever {
    docs: Vec<Document>,
    doc_freqs: HashMap<String, usize>,
    avg_len: f64,
}

impl LexicalRetriever {
    /// Index every entry of the knowledge map, in map order.
    pub fn build(knowledge: &KnowledgeMap) -> Self {
        let mut docs = Vec::with_capacity(knowledge.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for (label, text) in knowledge.iter() {
            let tokens = tokenize(text);
            let mut term_freqs: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += tokens.len();
            docs.push(Document {
                label: label.to_string(),
                term_freqs,
                len: tokens.len(),
            });
        }

        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };
        tracing::debug!(documents = docs.len(), avg_len, "built lexical retriever");

        Self {
            docs,
            doc_freqs,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 score of every document, in index order.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let mut terms = tokenize(query);
        if terms.is_empty() {
            terms = tokenize(FALLBACK_QUERY);
        }
        let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };

        self.docs
            .iter()
            .map(|doc| {
                terms
                    .iter()
                    .map(|term| {
                        let tf = doc.term_freqs.get(term).copied().unwrap_or(0) as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let norm = 1.0 - BM25_B + BM25_B * doc.len as f64 / avg_len;
                        self.idf(term) * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm)
                    })
                    .sum()
            })
            .collect()
    }
}

impl Retriever for LexicalRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        let scores = self.scores(query);
        let mut order: Vec<usize> = (0..self.docs.len()).collect();
        // Stable sort: equal scores keep knowledge-base order.
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
        order
            .into_iter()
            .take(k)
            .map(|idx| self.docs[idx].label.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> KnowledgeMap {
        KnowledgeMap::from_pairs([
            ("Influenza", "fever, cough, body aches, fatigue, headache"),
            ("Migraine", "headache, nausea, sensitivity to light"),
            ("Asthma", "shortness of breath, wheezing, chest tightness, cough"),
        ])
    }

    #[test]
    fn best_lexical_match_ranks_first() {
        let retriever = LexicalRetriever::build(&kb());
        let out = retriever.retrieve("wheezing and chest tightness", 2);
        assert_eq!(out[0], "Asthma");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn empty_query_returns_neutral_fallback() {
        let retriever = LexicalRetriever::build(&kb());
        let out = retriever.retrieve("   ", 3);
        assert_eq!(out, vec!["Influenza", "Migraine", "Asthma"]);
    }

    #[test]
    fn same_query_same_result() {
        let retriever = LexicalRetriever::build(&kb());
        assert_eq!(
            retriever.retrieve("headache", 3),
            retriever.retrieve("headache", 3)
        );
    }

    #[test]
    fn empty_index_returns_nothing() {
        let retriever = LexicalRetriever::build(&KnowledgeMap::new());
        assert!(retriever.retrieve("fever", 5).is_empty());
    }
}
