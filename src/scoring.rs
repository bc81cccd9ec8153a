//! Candidate scoring and probability calibration.
//!
//! Pipeline (order matters, each step sees the previous step's output):
//! 1. raw score per candidate from symptom matches and retrieval rank
//! 2. multiplicative penalties (acute/chronic mismatch, malignancy, denied symptoms)
//! 3. temperature-scaled softmax
//! 4. confidence cap (uniform rescale when the top value exceeds the cap)
//! 5. probability floor, then a final renormalization
//!
//! Step 5 can push a capped maximum back above the nominal cap and leave
//! floored entries slightly below the nominal floor; both are accepted.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::compatibility::is_incompatible;
use crate::config::ScoringConfig;
use crate::knowledge::Candidate;
use crate::patient::PatientProfile;
use crate::retrieval::tokenize;

/// Raw score given to candidates that fail the compatibility filter.
pub const INCOMPATIBLE_SCORE: f64 = 1e-9;

const SOFTMAX_EPS: f64 = 1e-12;
const ENTROPY_EPS: f64 = 1e-9;

const MALIGNANCY_TERMS: &[&str] = &["tumor", "carcinoma", "neoplasm"];

// =============================================================================
// Distribution
// =============================================================================

/// One label's probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelProbability {
    pub label: String,
    pub probability: f64,
}

/// Probability distribution over candidates, stored in candidate order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distribution {
    entries: Vec<LabelProbability>,
}

impl Distribution {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(label, probability)| LabelProbability { label, probability })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in candidate order.
    pub fn entries(&self) -> &[LabelProbability] {
        &self.entries
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.probability)
    }

    /// Entries sorted by descending probability; ties keep candidate order.
    pub fn ranked(&self) -> Vec<&LabelProbability> {
        let mut ranked: Vec<&LabelProbability> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(Ordering::Equal)
        });
        ranked
    }

    pub fn top(&self) -> Option<&LabelProbability> {
        self.ranked().into_iter().next()
    }

    /// Top probability, 0.0 when empty.
    pub fn top_probability(&self) -> f64 {
        self.top().map(|e| e.probability).unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.probability).sum()
    }

    pub fn entropy(&self) -> f64 {
        shannon_entropy(self.entries.iter().map(|e| e.probability))
    }
}

/// `-sum(p * ln(p + eps))`, natural log.
pub fn shannon_entropy(probs: impl IntoIterator<Item = f64>) -> f64 {
    -probs
        .into_iter()
        .map(|p| p * (p + ENTROPY_EPS).ln())
        .sum::<f64>()
}

// =============================================================================
// Scorer
// =============================================================================

/// Converts candidates plus symptom evidence into a calibrated distribution.
#[derive(Debug, Clone, Copy)]
pub struct Scorer<'a> {
    config: &'a ScoringConfig,
}

impl<'a> Scorer<'a> {
    pub fn new(config: &'a ScoringConfig) -> Self {
        Self { config }
    }

    /// Raw (pre-softmax) score per candidate, aligned with `candidates`.
    ///
    /// `profile = None` skips the compatibility check entirely.
    pub fn raw_scores(
        &self,
        candidates: &[Candidate],
        positives: &[String],
        profile: Option<&PatientProfile>,
        negatives: &[String],
    ) -> Vec<f64> {
        let cfg = self.config;
        let n = candidates.len();
        let age = profile.and_then(|p| p.age_years());
        let symptom_text = positives.join(" ").to_lowercase();
        let positives_lower: Vec<String> = positives.iter().map(|s| s.to_lowercase()).collect();
        let positive_tokens: Vec<Vec<String>> = positives.iter().map(|s| tokenize(s)).collect();
        let negatives_lower: Vec<String> = negatives
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        candidates
            .iter()
            .enumerate()
            .map(|(rank, cand)| {
                if let Some(p) = profile {
                    if is_incompatible(&cand.label, age, p.sex) {
                        return INCOMPATIBLE_SCORE;
                    }
                }

                let kb = cand.knowledge.to_lowercase();
                let label = cand.label.to_lowercase();

                let exact = positives_lower.iter().filter(|s| kb.contains(s.as_str())).count();
                let partial = positive_tokens
                    .iter()
                    .filter(|tokens| {
                        let hits = tokens.iter().filter(|t| kb.contains(t.as_str())).count();
                        hits >= (tokens.len() / 2).max(1)
                    })
                    .count();

                let mut score = 1.0
                    + cfg.exact_weight * exact as f64
                    + cfg.partial_weight * partial as f64
                    + cfg.rank_weight * (n - rank) as f64;

                let condition_text = format!("{kb}{label}");
                if symptom_text.contains("acute") && condition_text.contains("chronic") {
                    score *= cfg.acute_chronic_penalty;
                }
                if symptom_text.contains("chronic") && condition_text.contains("acute") {
                    score *= cfg.chronic_acute_penalty;
                }
                if MALIGNANCY_TERMS.iter().any(|t| label.contains(t)) {
                    score *= cfg.malignancy_penalty;
                }
                for negative in &negatives_lower {
                    if kb.contains(negative.as_str()) {
                        score *= cfg.negative_match_penalty;
                    }
                }
                score
            })
            .collect()
    }

    /// Full scoring pass: raw scores, then [`calibrate`].
    pub fn score(
        &self,
        candidates: &[Candidate],
        positives: &[String],
        profile: Option<&PatientProfile>,
        negatives: &[String],
    ) -> Distribution {
        let raw = self.raw_scores(candidates, positives, profile, negatives);
        let probs = calibrate(&raw, self.config);
        Distribution::from_pairs(
            candidates
                .iter()
                .map(|c| c.label.clone())
                .zip(probs),
        )
    }
}

/// Softmax -> cap -> floor -> renormalize. Empty input yields empty output.
pub fn calibrate(raw: &[f64], cfg: &ScoringConfig) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }

    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw
        .iter()
        .map(|s| ((s - max) / cfg.softmax_temperature).exp())
        .collect();
    let denom = exps.iter().sum::<f64>() + SOFTMAX_EPS;
    let mut probs: Vec<f64> = exps.iter().map(|e| e / denom).collect();

    let top = probs.iter().copied().fold(0.0, f64::max);
    if top >= cfg.confidence_cap && top > 0.0 {
        let scale = cfg.confidence_cap / top;
        for p in probs.iter_mut() {
            *p = (*p * scale).min(cfg.confidence_cap);
        }
    }

    for p in probs.iter_mut() {
        *p = p.max(cfg.probability_floor);
    }

    let total: f64 = probs.iter().sum();
    if total > 0.0 {
        for p in probs.iter_mut() {
            *p /= total;
        }
    }
    probs
}
