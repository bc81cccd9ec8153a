//! Knowledge-base and retriever collaborators.
//!
//! The core never builds or owns a retrieval index. It talks to two
//! injected services:
//! - [`Retriever`]: free-text query -> ranked condition labels
//! - [`KnowledgeBase`]: condition label -> free-text symptom description
//!
//! [`KnowledgeMap`] is the file-backed knowledge lookup used by the CLI and
//! as the document source for [`crate::retrieval::LexicalRetriever`].

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A condition label with the knowledge text retrieved for it this round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub label: String,
    pub knowledge: String,
}

impl Candidate {
    pub fn new(label: impl Into<String>, knowledge: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            knowledge: knowledge.into(),
        }
    }
}

/// Maps a query to condition labels, best match first, no duplicates.
///
/// Implementations must be idempotent for identical inputs and must not
/// fail: an empty or unusable query yields a neutral fallback result.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Vec<String>;
}

/// Knowledge-text lookup. Unknown labels resolve to an empty string.
pub trait KnowledgeBase: Send + Sync {
    fn knowledge_text(&self, label: &str) -> String;

    /// Resolve labels into candidates, dropping repeated labels (first wins).
    fn resolve(&self, labels: &[String]) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        labels
            .iter()
            .filter(|label| seen.insert(label.as_str()))
            .map(|label| Candidate::new(label.clone(), self.knowledge_text(label)))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse knowledge file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("line {line}: {message}")]
    Record { line: usize, message: String },
}

/// One condition record as found in knowledge files.
#[derive(Debug, Clone, Deserialize)]
struct ConditionRecord {
    #[serde(alias = "disease", alias = "label", alias = "name")]
    condition: String,
    #[serde(alias = "symptom_text", alias = "text", alias = "description")]
    symptoms: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KnowledgeFile {
    Records(Vec<ConditionRecord>),
    Map(HashMap<String, String>),
}

/// Ordered, in-memory condition -> symptom-text map.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl KnowledgeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<L, T>(pairs: impl IntoIterator<Item = (L, T)>) -> Self
    where
        L: Into<String>,
        T: Into<String>,
    {
        let mut map = Self::new();
        for (label, text) in pairs {
            map.insert(label, text);
        }
        map
    }

    /// Insert or replace. A replaced entry keeps its original position.
    pub fn insert(&mut self, label: impl Into<String>, text: impl Into<String>) {
        let label = label.into();
        let text = text.into();
        match self.index.get(&label) {
            Some(&idx) => self.entries[idx].1 = text,
            None => {
                self.index.insert(label.clone(), self.entries.len());
                self.entries.push((label, text));
            }
        }
    }

    /// Load a `.json` (array of records or label -> text object) or `.jsonl` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let is_jsonl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
        if is_jsonl {
            Self::from_jsonl_str(&raw)
        } else {
            Self::from_json_str(&raw)
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, KnowledgeError> {
        let parsed: KnowledgeFile = serde_json::from_str(raw)?;
        let map = match parsed {
            KnowledgeFile::Records(records) => {
                Self::from_pairs(records.into_iter().map(|r| (r.condition, r.symptoms)))
            }
            KnowledgeFile::Map(entries) => {
                // Object keys carry no order; sort for deterministic tie-breaking.
                let mut pairs: Vec<(String, String)> = entries.into_iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                Self::from_pairs(pairs)
            }
        };
        Ok(map)
    }

    pub fn from_jsonl_str(raw: &str) -> Result<Self, KnowledgeError> {
        let mut map = Self::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: ConditionRecord =
                serde_json::from_str(line).map_err(|e| KnowledgeError::Record {
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            map.insert(record.condition, record.symptoms);
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, t)| (l.as_str(), t.as_str()))
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.index.get(label).map(|&idx| self.entries[idx].1.as_str())
    }
}

impl KnowledgeBase for KnowledgeMap {
    fn knowledge_text(&self, label: &str) -> String {
        self.get(label).unwrap_or_default().to_string()
    }
}
