//! Engine configuration: scoring weights, calibration, loop control.
//!
//! Every constant the core reads lives here and is injected into the
//! components that need it. Files may be TOML or JSON; missing fields fall
//! back to the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for a [`crate::consultation::DiagnosticEngine`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub questioning: LoopConfig,
    pub intake: IntakeConfig,
    pub report: ReportConfig,
}

// =============================================================================
// Scoring
// =============================================================================

/// Weights, penalties and calibration constants for the candidate scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    // -- Raw score -----------------------------------------------------------
    /// Weight per reported symptom found verbatim in the knowledge text.
    pub exact_weight: f64,
    /// Weight per reported symptom with at least half its tokens present.
    pub partial_weight: f64,
    /// Weight of the linear retrieval-rank bonus `N - rank_index`.
    pub rank_weight: f64,

    // -- Multiplicative penalties -------------------------------------------
    /// Acute symptoms reported against a chronic condition.
    pub acute_chronic_penalty: f64,
    /// Chronic symptoms reported against an acute condition.
    pub chronic_acute_penalty: f64,
    /// Labels naming tumors, carcinomas or neoplasms.
    pub malignancy_penalty: f64,
    /// Applied once per denied symptom present in the knowledge text.
    pub negative_match_penalty: f64,

    // -- Calibration --------------------------------------------------------
    /// Softmax temperature; lower values sharpen the distribution.
    pub softmax_temperature: f64,
    /// Minimum probability assigned to every candidate before renormalizing.
    pub probability_floor: f64,
    /// Maximum probability allowed before the floor is applied.
    pub confidence_cap: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            exact_weight: 4.0,
            partial_weight: 1.2,
            rank_weight: 0.1,
            acute_chronic_penalty: 0.7,
            chronic_acute_penalty: 0.77,
            malignancy_penalty: 0.7,
            negative_match_penalty: 0.5,
            softmax_temperature: 0.6,
            probability_floor: 0.05,
            confidence_cap: 0.95,
        }
    }
}

// =============================================================================
// Questioning loop
// =============================================================================

/// Controls for the active-questioning loop and the symptom pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Questions asked before confidence-based stopping is considered.
    pub min_questions: usize,
    /// Hard budget of follow-up questions.
    pub max_questions: usize,
    /// Top probability at which the loop may stop early.
    pub stop_confidence: f64,
    /// Candidates retrieved per questioning round.
    pub retrieval_k: usize,
    /// Candidates retrieved for the final scoring pass.
    pub final_retrieval_k: usize,
    /// Pool phrases taken as initial evidence when a consultation starts.
    pub seed_phrases: usize,
    pub pool_per_candidate: usize,
    pub pool_max_total: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            min_questions: 3,
            max_questions: 8,
            stop_confidence: 0.75,
            retrieval_k: 6,
            final_retrieval_k: 6,
            seed_phrases: 3,
            pool_per_candidate: 6,
            pool_max_total: 20,
        }
    }
}

// =============================================================================
// Intake / answer interpretation
// =============================================================================

/// Keyword lists used to interpret free-text answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub affirmative_words: Vec<String>,
    pub negative_words: Vec<String>,
    /// Symptom words picked up from anywhere in an answer.
    pub symptom_vocabulary: Vec<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            affirmative_words: to_strings(&[
                "yes", "yeah", "have", "sure", "correct", "yep", "positive",
            ]),
            negative_words: to_strings(&["no", "nah", "don't", "not", "negative"]),
            symptom_vocabulary: to_strings(&[
                "pain", "fever", "cough", "headache", "nausea", "vomit", "vomiting", "diarrhea",
                "dizzy", "fatigue", "weakness", "rash", "bleeding", "breath", "cold", "sneeze",
                "runny", "stomach", "chest", "throat",
            ]),
        }
    }
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Candidates listed in the ranked differential.
    pub top_candidates: usize,
    /// Candidates considered for the reasoning section.
    pub reasoning_candidates: usize,
    /// Maximum characters of knowledge text shown per candidate.
    pub snippet_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_candidates: 6,
            reasoning_candidates: 5,
            snippet_chars: 260,
        }
    }
}

// =============================================================================
// Loading / validation
// =============================================================================

impl EngineConfig {
    /// Load a config file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&raw)?
        } else {
            Self::from_toml_str(&raw)?
        };
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        let weights = [
            ("exact_weight", s.exact_weight),
            ("partial_weight", s.partial_weight),
            ("rank_weight", s.rank_weight),
        ];
        for (name, value) in weights {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(invalid(&format!("scoring.{name} must be a finite number >= 0")));
            }
        }
        if !(s.softmax_temperature > 0.0) || !s.softmax_temperature.is_finite() {
            return Err(invalid("scoring.softmax_temperature must be a finite number > 0"));
        }
        if !(0.0..1.0).contains(&s.probability_floor) {
            return Err(invalid("scoring.probability_floor must be in [0, 1)"));
        }
        if !(s.confidence_cap > 0.0 && s.confidence_cap <= 1.0) {
            return Err(invalid("scoring.confidence_cap must be in (0, 1]"));
        }
        let penalties = [
            ("acute_chronic_penalty", s.acute_chronic_penalty),
            ("chronic_acute_penalty", s.chronic_acute_penalty),
            ("malignancy_penalty", s.malignancy_penalty),
            ("negative_match_penalty", s.negative_match_penalty),
        ];
        for (name, value) in penalties {
            if !(value > 0.0) || !value.is_finite() {
                return Err(invalid(&format!("scoring.{name} must be a positive number")));
            }
        }

        let q = &self.questioning;
        if q.min_questions > q.max_questions {
            return Err(invalid(
                "questioning.min_questions must not exceed questioning.max_questions",
            ));
        }
        if !(q.stop_confidence > 0.0 && q.stop_confidence <= 1.0) {
            return Err(invalid("questioning.stop_confidence must be in (0, 1]"));
        }
        if q.retrieval_k == 0 || q.final_retrieval_k == 0 {
            return Err(invalid("questioning retrieval sizes must be >= 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
