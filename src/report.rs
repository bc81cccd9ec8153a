//! Final diagnostic report: structured form plus markdown rendering.
//!
//! Building is pure and deterministic. Reasoning sentences cycle through
//! three phrasings per confidence tier, keyed by rank.

use blake3;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::knowledge::Candidate;
use crate::patient::{PatientProfile, Sex};
use crate::pool::extract_pool;
use crate::scoring::Distribution;
use crate::selector::AskedSet;

const HIGH_TIER: f64 = 0.5;
const MODERATE_TIER: f64 = 0.2;

const FALLBACK_FOLLOW_UP: &str = "any other symptoms";
const INSUFFICIENT_DATA: &str = "Not enough data to generate a report.";

const INFECTION_WORKUP: &str = "Order a CBC with CRP/ESR to look for infection or inflammation.";
const CHEST_IMAGING: &str = "Consider a chest X-ray to assess respiratory involvement.";
const FOCUSED_EXAM: &str = "Perform a focused physical exam with targeted laboratory tests.";

/// Everything the report is built from. All borrowed; nothing is mutated.
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs<'a> {
    pub profile: &'a PatientProfile,
    pub positives: &'a [String],
    pub negatives: &'a [String],
    pub candidates: &'a [Candidate],
    pub distribution: &'a Distribution,
    /// Phrases never to suggest as the follow-up.
    pub asked: Option<&'a AskedSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Moderate,
    Low,
}

impl ConfidenceTier {
    pub fn of(confidence: f64) -> Self {
        if confidence > HIGH_TIER {
            ConfidenceTier::High
        } else if confidence > MODERATE_TIER {
            ConfidenceTier::Moderate
        } else {
            ConfidenceTier::Low
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPatient {
    pub name: String,
    pub age: String,
    pub sex: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedCondition {
    pub rank: usize,
    pub label: String,
    pub snippet: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningLine {
    pub label: String,
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub matching_symptoms: Vec<String>,
    pub sentence: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Impression {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    /// blake3 over the serialized inputs.
    pub evidence_hash: String,
    pub patient: ReportPatient,
    pub symptoms: Vec<String>,
    pub ruled_out: Vec<String>,
    pub differential: Vec<RankedCondition>,
    pub reasoning: Vec<ReasoningLine>,
    pub impression: Option<Impression>,
    /// No ranked candidate matches any reported symptom, or nothing was ranked.
    pub inconclusive: bool,
    pub next_steps: Vec<String>,
    pub follow_up: Option<String>,
}

impl DiagnosticReport {
    pub fn top_label(&self) -> Option<&str> {
        self.impression.as_ref().map(|i| i.label.as_str())
    }

    pub fn top_confidence(&self) -> Option<f64> {
        self.impression.as_ref().map(|i| i.confidence)
    }
}

pub fn build_report(inputs: &ReportInputs<'_>, config: &EngineConfig) -> DiagnosticReport {
    let evidence_hash = hash_inputs(inputs);
    let patient = ReportPatient::from_profile(inputs.profile);
    let symptoms = inputs.positives.to_vec();
    let ruled_out = inputs.negatives.to_vec();

    let ranked = inputs.distribution.ranked();
    let Some(top) = ranked.first() else {
        return DiagnosticReport {
            evidence_hash,
            patient,
            symptoms,
            ruled_out,
            differential: Vec::new(),
            reasoning: Vec::new(),
            impression: None,
            inconclusive: true,
            next_steps: Vec::new(),
            follow_up: None,
        };
    };

    let differential = ranked
        .iter()
        .take(config.report.top_candidates)
        .enumerate()
        .map(|(idx, entry)| RankedCondition {
            rank: idx + 1,
            label: entry.label.clone(),
            snippet: snippet(
                knowledge_of(inputs.candidates, &entry.label),
                config.report.snippet_chars,
            ),
            confidence: entry.probability,
        })
        .collect();

    let mut reasoning = Vec::new();
    for (idx, entry) in ranked.iter().take(config.report.reasoning_candidates).enumerate() {
        let knowledge = knowledge_of(inputs.candidates, &entry.label);
        let matching = matching_symptoms(knowledge, inputs.positives);
        if matching.is_empty() {
            continue;
        }
        let tier = ConfidenceTier::of(entry.probability);
        let sentence = reasoning_sentence(tier, idx, &entry.label, &matching.join(", "));
        reasoning.push(ReasoningLine {
            label: entry.label.clone(),
            confidence: entry.probability,
            tier,
            matching_symptoms: matching,
            sentence,
        });
    }

    let inconclusive = !ranked.iter().any(|entry| {
        let knowledge = knowledge_of(inputs.candidates, &entry.label);
        !matching_symptoms(knowledge, inputs.positives).is_empty()
    });

    let next_steps = if inconclusive {
        vec![FOCUSED_EXAM.to_string()]
    } else {
        keyword_next_steps(&top.label, inputs.positives)
    };

    let follow_up = if top.probability < config.questioning.stop_confidence {
        Some(follow_up_phrase(inputs, config))
    } else {
        None
    };

    DiagnosticReport {
        evidence_hash,
        patient,
        symptoms,
        ruled_out,
        differential,
        reasoning,
        impression: Some(Impression {
            label: top.label.clone(),
            confidence: top.probability,
        }),
        inconclusive,
        next_steps,
        follow_up,
    }
}

impl ReportPatient {
    fn from_profile(profile: &PatientProfile) -> Self {
        let or_na = |v: Option<&str>| match v.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => "N/A".to_string(),
        };
        Self {
            name: or_na(profile.name.as_deref()),
            age: or_na(profile.age.as_deref()),
            sex: match profile.sex {
                Sex::Other => "N/A".to_string(),
                sex => sex.short_code().to_string(),
            },
        }
    }
}

fn knowledge_of<'c>(candidates: &'c [Candidate], label: &str) -> &'c str {
    candidates
        .iter()
        .find(|c| c.label == label)
        .map(|c| c.knowledge.as_str())
        .unwrap_or("")
}

/// First sentence of the knowledge text, at most `max_chars` characters.
fn snippet(knowledge: &str, max_chars: usize) -> String {
    let first = knowledge.split('.').next().unwrap_or("");
    first.trim().chars().take(max_chars).collect()
}

fn matching_symptoms(knowledge: &str, positives: &[String]) -> Vec<String> {
    let kb = knowledge.to_lowercase();
    positives
        .iter()
        .filter(|s| kb.contains(&s.to_lowercase()))
        .cloned()
        .collect()
}

fn reasoning_sentence(tier: ConfidenceTier, rank: usize, label: &str, symptoms: &str) -> String {
    match (tier, rank % 3) {
        (ConfidenceTier::High, 0) => {
            format!("{label} is the leading candidate; {symptoms} fit this condition closely.")
        }
        (ConfidenceTier::High, 1) => {
            format!("The findings point strongly to {label}, supported by {symptoms}.")
        }
        (ConfidenceTier::High, _) => {
            format!("Taken together, {symptoms} make {label} the most probable explanation.")
        }
        (ConfidenceTier::Moderate, 0) => format!(
            "{label} remains plausible: {symptoms} overlap, but other defining features are not yet established."
        ),
        (ConfidenceTier::Moderate, 1) => {
            format!("Keep {label} on the differential; {symptoms} match with moderate confidence.")
        }
        (ConfidenceTier::Moderate, _) => {
            format!("Some findings ({symptoms}) support {label}, though it is a secondary consideration.")
        }
        (ConfidenceTier::Low, 0) => {
            format!("{label} cannot be excluded, but only minor overlap ({symptoms}) was found.")
        }
        (ConfidenceTier::Low, 1) => {
            format!("{label} is unlikely; the match is limited to {symptoms}.")
        }
        (ConfidenceTier::Low, _) => {
            format!("Evidence for {label} is weak and rests on {symptoms} alone.")
        }
    }
}

fn keyword_next_steps(top_label: &str, positives: &[String]) -> Vec<String> {
    let label = top_label.to_lowercase();
    let symptoms = positives.join(" ").to_lowercase();

    let mut steps = Vec::new();
    if label.contains("infect") || symptoms.contains("fever") {
        steps.push(INFECTION_WORKUP.to_string());
    }
    if label.contains("lung") || symptoms.contains("cough") {
        steps.push(CHEST_IMAGING.to_string());
    }
    if steps.is_empty() {
        steps.push(FOCUSED_EXAM.to_string());
    }
    steps
}

fn follow_up_phrase(inputs: &ReportInputs<'_>, config: &EngineConfig) -> String {
    let known = |phrase: &str| {
        let lower = phrase.to_lowercase();
        inputs
            .positives
            .iter()
            .chain(inputs.negatives)
            .any(|s| s.to_lowercase() == lower)
            || inputs.asked.is_some_and(|asked| asked.contains(phrase))
    };
    extract_pool(
        inputs.candidates,
        config.questioning.pool_per_candidate,
        config.questioning.pool_max_total,
    )
    .into_iter()
    .find(|phrase| !known(phrase))
    .unwrap_or_else(|| FALLBACK_FOLLOW_UP.to_string())
}

#[derive(Serialize)]
struct HashedInputs<'a> {
    profile: &'a PatientProfile,
    positives: &'a [String],
    negatives: &'a [String],
    candidates: &'a [Candidate],
    distribution: &'a Distribution,
}

fn hash_inputs(inputs: &ReportInputs<'_>) -> String {
    let hashed = HashedInputs {
        profile: inputs.profile,
        positives: inputs.positives,
        negatives: inputs.negatives,
        candidates: inputs.candidates,
        distribution: inputs.distribution,
    };
    let bytes = serde_json::to_vec(&hashed).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

pub fn render_report_markdown(report: &DiagnosticReport) -> String {
    let Some(impression) = &report.impression else {
        return INSUFFICIENT_DATA.to_string();
    };

    let mut out = String::new();
    out.push_str("# Diagnostic Reasoning Report\n\n");
    out.push_str(&format!(
        "- Patient: {}, Age: {}, Sex: {}\n",
        report.patient.name, report.patient.age, report.patient.sex
    ));
    out.push_str(&format!("- Evidence hash: `{}`\n", report.evidence_hash));

    out.push_str("\n## Reported Symptoms\n\n");
    if report.symptoms.is_empty() {
        out.push_str("- (none)\n");
    }
    for symptom in &report.symptoms {
        out.push_str(&format!("- {symptom}\n"));
    }
    if !report.ruled_out.is_empty() {
        out.push_str("\n## Ruled Out\n\n");
        for symptom in &report.ruled_out {
            out.push_str(&format!("- {symptom}\n"));
        }
    }

    out.push_str("\n## Likely Diagnoses\n\n");
    for cond in &report.differential {
        if cond.snippet.is_empty() {
            out.push_str(&format!(
                "{}. **{}** (confidence {:.2})\n",
                cond.rank, cond.label, cond.confidence
            ));
        } else {
            out.push_str(&format!(
                "{}. **{}**: {} (confidence {:.2})\n",
                cond.rank, cond.label, cond.snippet, cond.confidence
            ));
        }
    }

    if !report.reasoning.is_empty() {
        out.push_str("\n## Diagnostic Analysis\n\n");
        for line in &report.reasoning {
            out.push_str(&format!(
                "- {} (confidence {:.1}%)\n",
                line.sentence,
                line.confidence * 100.0
            ));
        }
    }

    out.push_str("\n## Final Impression\n\n");
    if report.inconclusive {
        out.push_str(&format!(
            "The evidence is inconclusive. **{}** ranks highest with an estimated confidence of **{:.2}**.\n",
            impression.label, impression.confidence
        ));
    } else {
        out.push_str(&format!(
            "Based on the current evidence, **{}** is the most likely diagnosis, with an estimated confidence of **{:.2}**.\n",
            impression.label, impression.confidence
        ));
    }

    out.push_str("\n## Recommended Next Steps\n\n");
    for step in &report.next_steps {
        out.push_str(&format!("- {step}\n"));
    }

    if let Some(phrase) = &report.follow_up {
        out.push_str("\n## Additional Symptom Check\n\n");
        out.push_str(&format!(
            "To refine the diagnosis further: do you have **{phrase}**?\n"
        ));
    }

    out
}
