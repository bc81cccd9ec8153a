//! Consultation state value object and loop vocabulary.

use serde::{Deserialize, Serialize};

use crate::knowledge::Candidate;
use crate::patient::PatientProfile;
use crate::report::DiagnosticReport;
use crate::scoring::Distribution;
use crate::selector::AskedSet;

// =============================================================================
// Evidence
// =============================================================================

/// Reported and denied symptoms. The two lists never share an entry
/// (case-insensitive); the latest statement about a symptom wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    positives: Vec<String>,
    negatives: Vec<String>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported symptoms in the order they were first reported.
    pub fn positives(&self) -> &[String] {
        &self.positives
    }

    pub fn negatives(&self) -> &[String] {
        &self.negatives
    }

    /// Returns true if the symptom was newly added.
    pub fn add_positive(&mut self, symptom: &str) -> bool {
        insert_exclusive(&mut self.positives, &mut self.negatives, symptom)
    }

    /// Returns true if the symptom was newly added.
    pub fn add_negative(&mut self, symptom: &str) -> bool {
        insert_exclusive(&mut self.negatives, &mut self.positives, symptom)
    }

    pub fn is_positive(&self, symptom: &str) -> bool {
        position(&self.positives, symptom).is_some()
    }

    pub fn is_negative(&self, symptom: &str) -> bool {
        position(&self.negatives, symptom).is_some()
    }

    /// Retrieval query for the current round.
    pub fn query_text(&self) -> String {
        self.positives.join(", ")
    }
}

fn position(list: &[String], symptom: &str) -> Option<usize> {
    let needle = symptom.trim().to_lowercase();
    list.iter().position(|s| s.to_lowercase() == needle)
}

fn insert_exclusive(target: &mut Vec<String>, other: &mut Vec<String>, symptom: &str) -> bool {
    let symptom = symptom.trim();
    if symptom.is_empty() {
        return false;
    }
    if let Some(idx) = position(other, symptom) {
        other.remove(idx);
    }
    if position(target, symptom).is_some() {
        return false;
    }
    target.push(symptom.to_string());
    true
}

// =============================================================================
// Loop vocabulary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Seeding,
    Questioning,
    Terminated,
}

/// Why the questioning loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Top confidence met the stop threshold after the minimum interview.
    ConfidenceReached,
    /// `max_questions` answered.
    QuestionBudgetExhausted,
    /// Pool exhausted, or no phrase reduces entropy past the minimum.
    NoInformativeQuestion,
    /// Retrieval returned nothing usable.
    NoCandidates,
    /// Concluded before the loop stopped on its own.
    EndedByCaller,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::ConfidenceReached => "confidence_reached",
            StopReason::QuestionBudgetExhausted => "question_budget_exhausted",
            StopReason::NoInformativeQuestion => "no_informative_question",
            StopReason::NoCandidates => "no_candidates",
            StopReason::EndedByCaller => "ended_by_caller",
        }
    }
}

/// Result of one `advance` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    /// Put this phrase to the patient, then call `answer`.
    Ask(String),
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Patient,
    Engine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsultationError {
    #[error("consultation {0} has already terminated")]
    Terminated(String),
    #[error("consultation {id} is waiting for an answer to {question:?}")]
    AwaitingAnswer { id: String, question: String },
    #[error("consultation {0} has no pending question")]
    NoPendingQuestion(String),
    #[error("consultation {0} has not been seeded")]
    Unseeded(String),
    #[error("consultation {0} has already been seeded")]
    AlreadySeeded(String),
}

/// A rejected step. Carries the state back untouched so the caller can retry
/// with the right call instead of losing the consultation.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct StepError {
    pub state: Box<ConsultationState>,
    pub error: ConsultationError,
}

impl StepError {
    pub(crate) fn new(state: ConsultationState, error: ConsultationError) -> Self {
        Self {
            state: Box::new(state),
            error,
        }
    }

    pub fn error(&self) -> &ConsultationError {
        &self.error
    }

    pub fn into_state(self) -> ConsultationState {
        *self.state
    }

    pub fn into_error(self) -> ConsultationError {
        self.error
    }
}

// =============================================================================
// State
// =============================================================================

/// Everything a consultation accumulates. Passed by value into each engine
/// step and returned updated; nothing is held between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationState {
    pub(crate) id: String,
    pub(crate) profile: PatientProfile,
    pub(crate) complaint: String,
    pub(crate) evidence: Evidence,
    pub(crate) asked: AskedSet,
    pub(crate) questions_asked: usize,
    pub(crate) phase: Phase,
    pub(crate) pending: Option<String>,
    pub(crate) stop_reason: Option<StopReason>,
    pub(crate) transcript: Vec<TranscriptEntry>,
}

impl ConsultationState {
    /// Fresh, unseeded state.
    pub fn new(profile: PatientProfile, complaint: impl Into<String>) -> Self {
        let complaint = complaint.into().trim().to_string();
        let transcript = if complaint.is_empty() {
            Vec::new()
        } else {
            vec![TranscriptEntry {
                speaker: Speaker::Patient,
                text: complaint.clone(),
            }]
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            profile,
            complaint,
            evidence: Evidence::new(),
            asked: AskedSet::new(),
            questions_asked: 0,
            phase: Phase::Seeding,
            pending: None,
            stop_reason: None,
            transcript,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &PatientProfile {
        &self.profile
    }

    pub fn complaint(&self) -> &str {
        &self.complaint
    }

    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    pub fn asked(&self) -> &AskedSet {
        &self.asked
    }

    /// Questions answered so far.
    pub fn questions_asked(&self) -> usize {
        self.questions_asked
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_question(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminated
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Transcript as `speaker: text` lines.
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(|e| {
                let who = match e.speaker {
                    Speaker::Patient => "patient",
                    Speaker::Engine => "engine",
                };
                format!("{who}: {}", e.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub(crate) fn say(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            speaker,
            text: text.into(),
        });
    }

    pub(crate) fn terminate(&mut self, reason: StopReason) {
        self.phase = Phase::Terminated;
        self.pending = None;
        self.stop_reason.get_or_insert(reason);
    }
}

/// How a reply was applied to the evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSummary {
    pub question: String,
    pub kind: crate::intake::AnswerKind,
    /// Vocabulary symptoms picked up from elsewhere in the reply.
    pub extra_symptoms: Vec<String>,
}

/// Final product of a consultation.
#[derive(Debug, Clone, Serialize)]
pub struct ConsultationOutcome {
    pub state: ConsultationState,
    pub candidates: Vec<Candidate>,
    pub distribution: Distribution,
    pub report: DiagnosticReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_statement_wins() {
        let mut ev = Evidence::new();
        assert!(ev.add_positive("Fever"));
        assert!(ev.add_negative("fever"));
        assert!(!ev.is_positive("fever"));
        assert!(ev.is_negative("FEVER"));
        assert!(ev.add_positive(" fever "));
        assert!(ev.negatives().is_empty());
        assert_eq!(ev.positives(), &["fever".to_string()]);
    }

    #[test]
    fn duplicates_and_blanks_are_ignored() {
        let mut ev = Evidence::new();
        assert!(ev.add_positive("cough"));
        assert!(!ev.add_positive("Cough"));
        assert!(!ev.add_positive("   "));
        assert_eq!(ev.query_text(), "cough");
    }

    #[test]
    fn first_stop_reason_sticks() {
        let mut state = ConsultationState::new(PatientProfile::default(), "cough");
        state.pending = Some("fever".into());
        state.terminate(StopReason::ConfidenceReached);
        state.terminate(StopReason::EndedByCaller);
        assert_eq!(state.stop_reason(), Some(StopReason::ConfidenceReached));
        assert!(state.pending_question().is_none());
    }
}
