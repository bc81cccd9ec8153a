//! Free-text intake parsing and answer interpretation.
//!
//! Both are keyword heuristics. They sit outside the scoring core: the
//! engine only sees the classified answer and the extracted symptoms.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::IntakeConfig;
use crate::patient::Sex;

static AGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,3})\s*(years|yrs|yr|old)\b").expect("Invalid age regex")
});
static MALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(male|man|boy)\b").expect("Invalid sex regex"));
static FEMALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(female|woman|girl)\b").expect("Invalid sex regex"));
// Prefix is case-insensitive, the name itself must be capitalized.
static NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:my name is|this is|i am)\s+([A-Z][a-z]+)").expect("Invalid name regex")
});
static REPLY_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w']+").expect("Invalid reply word regex"));

// =============================================================================
// Intake
// =============================================================================

/// Demographics recovered from an opening statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeDetails {
    pub name: Option<String>,
    pub age: Option<String>,
    pub sex: Option<Sex>,
    /// The whole trimmed statement.
    pub complaint: String,
}

pub fn parse_intake(text: &str) -> IntakeDetails {
    let text = text.trim();
    if text.is_empty() {
        return IntakeDetails::default();
    }

    let age = AGE.captures(text).map(|c| c[1].to_string());
    let sex = if MALE.is_match(text) {
        Some(Sex::Male)
    } else if FEMALE.is_match(text) {
        Some(Sex::Female)
    } else {
        None
    };
    let name = NAME.captures(text).map(|c| c[1].to_string());

    IntakeDetails {
        name,
        age,
        sex,
        complaint: text.to_string(),
    }
}

// =============================================================================
// Answers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Affirmative,
    Negative,
    Unclear,
}

/// Classifies replies to follow-up questions.
#[derive(Debug, Clone)]
pub struct AnswerInterpreter {
    affirmative: HashSet<String>,
    negative: HashSet<String>,
    vocabulary: Vec<String>,
}

impl AnswerInterpreter {
    pub fn new(config: &IntakeConfig) -> Self {
        Self {
            affirmative: lowercase_set(&config.affirmative_words),
            negative: lowercase_set(&config.negative_words),
            vocabulary: config.symptom_vocabulary.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Whole-word keyword match. Any negative keyword wins over affirmatives.
    pub fn classify(&self, reply: &str) -> AnswerKind {
        let words = reply_words(reply);
        if words.iter().any(|w| self.negative.contains(w)) {
            AnswerKind::Negative
        } else if words.iter().any(|w| self.affirmative.contains(w)) {
            AnswerKind::Affirmative
        } else {
            AnswerKind::Unclear
        }
    }

    /// Vocabulary symptoms mentioned in the reply, excluding the phrase just
    /// asked and anything already reported.
    pub fn extra_symptoms(
        &self,
        reply: &str,
        asked_phrase: &str,
        known_positives: &[String],
    ) -> Vec<String> {
        let words: HashSet<String> = reply_words(reply).into_iter().collect();
        let asked = asked_phrase.trim().to_lowercase();
        let known: HashSet<String> = known_positives
            .iter()
            .map(|s| s.trim().to_lowercase())
            .collect();

        self.vocabulary
            .iter()
            .filter(|token| words.contains(*token))
            .filter(|token| **token != asked && !known.contains(*token))
            .cloned()
            .collect()
    }
}

fn lowercase_set(words: &[String]) -> HashSet<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

fn reply_words(reply: &str) -> Vec<String> {
    let lower = reply.to_lowercase().replace('\u{2019}', "'");
    REPLY_WORD
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}
