#![forbid(unsafe_code)]

//! # ddx-harness
//!
//! Interactive differential diagnosis from free-text symptoms.
//!
//! Candidate conditions come from an injected retriever. Each round they are
//! filtered for the patient's age and sex, scored against the reported and
//! denied symptoms, and calibrated into a probability distribution. The
//! engine then asks the follow-up question whose answer is expected to
//! reduce the distribution's entropy the most, and stops once the leading
//! candidate is confident enough or the question budget runs out.
//!
//! The scoring and selection pieces are pure functions over snapshots; all
//! per-consultation state lives in a [`ConsultationState`] value that the
//! [`DiagnosticEngine`] takes and returns at every step.

pub mod compatibility;
pub mod config;
pub mod consultation;
pub mod intake;
pub mod knowledge;
pub mod patient;
pub mod pool;
pub mod report;
pub mod retrieval;
pub mod scoring;
pub mod selector;
pub mod store;
pub mod trace;

pub use config::{ConfigError, EngineConfig};
pub use consultation::{
    AffirmingResponder, ConsultationError, ConsultationOutcome, ConsultationState,
    DiagnosticEngine, Responder, ScriptedResponder, StepError, StopReason, Turn,
};
pub use knowledge::{Candidate, KnowledgeBase, KnowledgeError, KnowledgeMap, Retriever};
pub use patient::{PatientProfile, Sex};
pub use report::{build_report, render_report_markdown, DiagnosticReport};
pub use retrieval::LexicalRetriever;
pub use scoring::{Distribution, Scorer};
pub use store::{ConsultationStore, SqliteConsultationStore, StoreError};
pub use trace::{JsonlTraceSink, RoundTrace, TraceError, TraceSink, TraceSummary, TraceWorker};
