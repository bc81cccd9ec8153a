//! Active-questioning consultation loop.
//!
//! `Seeding -> Questioning -> Terminated`. A host drives it either step by
//! step (`begin`, then `advance` / `answer` pairs, then `conclude`) or in
//! one call with [`DiagnosticEngine::run`] and a [`Responder`].

mod engine;
mod responder;
mod state;

pub use engine::DiagnosticEngine;
pub use responder::{AffirmingResponder, Responder, ScriptedResponder};
pub use state::{
    AnswerSummary, ConsultationError, ConsultationOutcome, ConsultationState, Evidence, Phase,
    Speaker, StepError, StopReason, TranscriptEntry, Turn,
};
