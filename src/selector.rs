//! Greedy information-gain question selection.
//!
//! The trial distributions use positives only: no demographics, no denied
//! symptoms. It is an entropy proxy, not the full scoring configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::{LoopConfig, ScoringConfig};
use crate::knowledge::Candidate;
use crate::pool::extract_pool;
use crate::scoring::Scorer;

/// Gains at or below this are float noise, not information.
const MIN_GAIN: f64 = 1e-12;

/// Case-insensitive set of phrases already put to the patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AskedSet(BTreeSet<String>);

impl AskedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the phrase was already present.
    pub fn insert(&mut self, phrase: &str) -> bool {
        self.0.insert(normalize(phrase))
    }

    pub fn contains(&self, phrase: &str) -> bool {
        self.0.contains(&normalize(phrase))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

fn normalize(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}

/// The selected phrase and why it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionChoice {
    pub phrase: String,
    /// `H0 - H1` in nats. Zero or negative for minimum-interview fallbacks.
    pub information_gain: f64,
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct QuestionSelector<'a> {
    scorer: Scorer<'a>,
    questioning: &'a LoopConfig,
}

impl<'a> QuestionSelector<'a> {
    pub fn new(scoring: &'a ScoringConfig, questioning: &'a LoopConfig) -> Self {
        Self {
            scorer: Scorer::new(scoring),
            questioning,
        }
    }

    pub fn select_next(
        &self,
        candidates: &[Candidate],
        positives: &[String],
        asked: &AskedSet,
        min_questions: usize,
    ) -> Option<String> {
        self.select_next_scored(candidates, positives, asked, min_questions)
            .map(|choice| choice.phrase)
    }

    /// Pick the unasked pool phrase with the largest entropy reduction.
    ///
    /// Phrases already asked or already reported are never offered. With no
    /// positive gain, the first eligible phrase is returned only while fewer
    /// than `min_questions` questions have been asked.
    pub fn select_next_scored(
        &self,
        candidates: &[Candidate],
        positives: &[String],
        asked: &AskedSet,
        min_questions: usize,
    ) -> Option<QuestionChoice> {
        let reported: BTreeSet<String> = positives.iter().map(|s| normalize(s)).collect();
        let eligible: Vec<String> = extract_pool(
            candidates,
            self.questioning.pool_per_candidate,
            self.questioning.pool_max_total,
        )
        .into_iter()
        .filter(|p| !asked.contains(p) && !reported.contains(&normalize(p)))
        .collect();
        if eligible.is_empty() {
            return None;
        }

        let baseline = self.scorer.score(candidates, positives, None, &[]).entropy();

        let mut trial = positives.to_vec();
        let mut best: Option<(usize, f64)> = None;
        for (idx, phrase) in eligible.iter().enumerate() {
            trial.push(phrase.clone());
            let entropy = self.scorer.score(candidates, &trial, None, &[]).entropy();
            trial.pop();

            let gain = baseline - entropy;
            if gain > MIN_GAIN && best.map_or(true, |(_, g)| gain > g) {
                best = Some((idx, gain));
            }
        }

        match best {
            Some((idx, gain)) => Some(QuestionChoice {
                phrase: eligible[idx].clone(),
                information_gain: gain,
                fallback: false,
            }),
            None if asked.len() < min_questions => {
                tracing::debug!(
                    asked = asked.len(),
                    min_questions,
                    "no informative phrase; falling back to first unasked"
                );
                Some(QuestionChoice {
                    phrase: eligible[0].clone(),
                    information_gain: 0.0,
                    fallback: true,
                })
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asked_set_ignores_case_and_whitespace() {
        let mut asked = AskedSet::new();
        assert!(asked.insert("Chest Pain "));
        assert!(!asked.insert("chest pain"));
        assert!(asked.contains("CHEST PAIN"));
        assert_eq!(asked.len(), 1);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let scoring = ScoringConfig::default();
        let questioning = LoopConfig::default();
        let selector = QuestionSelector::new(&scoring, &questioning);
        assert!(selector
            .select_next(&[], &["fever".to_string()], &AskedSet::new(), 3)
            .is_none());
    }
}
