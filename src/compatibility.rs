//! Demographic plausibility gate applied before scoring.
//!
//! Rules are lower-cased substring checks on the condition label. An
//! unparseable age disables every age rule; `Sex::Other` disables every
//! sex rule.

use crate::patient::{PatientProfile, Sex};

const ELDERLY_TERMS: &[&str] = &["elderly", "geriatric", "senile"];
const PEDIATRIC_TERMS: &[&str] = &["infant", "child", "pediatric", "neonate"];
const STRUCTURAL_CARDIAC_TERMS: &[&str] = &["stenosis", "aneurysm", "heart failure"];
const CORONARY_TERMS: &[&str] = &["coronar", "angina", "ischemi"];
const FEMALE_ONLY_TERMS: &[&str] = &["pregnan", "ovarian", "uterine", "breast"];
const MALE_ONLY_TERMS: &[&str] = &["prostate", "testicular"];

fn mentions(label: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| label.contains(t))
}

/// True when the label is implausible for the given age and sex.
pub fn is_incompatible(label: &str, age: Option<i64>, sex: Sex) -> bool {
    let label = label.to_lowercase();

    if let Some(age) = age {
        if age < 40 && mentions(&label, ELDERLY_TERMS) {
            return true;
        }
        if age >= 18 && mentions(&label, PEDIATRIC_TERMS) {
            return true;
        }
        if age < 25 && mentions(&label, STRUCTURAL_CARDIAC_TERMS) {
            return true;
        }
        if age < 30 && mentions(&label, CORONARY_TERMS) {
            return true;
        }
    }

    match sex {
        Sex::Male => mentions(&label, FEMALE_ONLY_TERMS),
        Sex::Female => mentions(&label, MALE_ONLY_TERMS),
        Sex::Other => false,
    }
}

pub fn is_compatible_with(label: &str, profile: &PatientProfile) -> bool {
    !is_incompatible(label, profile.age_years(), profile.sex)
}

/// Drop incompatible labels, preserving order.
///
/// If nothing survives, the input is returned unchanged: an empty result
/// means the filter does not apply to this candidate set, not that no
/// candidate is valid.
pub fn filter_compatible(labels: &[String], profile: &PatientProfile) -> Vec<String> {
    let kept: Vec<String> = labels
        .iter()
        .filter(|label| is_compatible_with(label, profile))
        .cloned()
        .collect();
    if kept.is_empty() {
        if !labels.is_empty() {
            tracing::debug!(
                candidates = labels.len(),
                "compatibility filter removed every candidate; keeping unfiltered set"
            );
        }
        return labels.to_vec();
    }
    kept
}
