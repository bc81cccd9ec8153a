//! The diagnostic loop: seed, question, stop, conclude.
//!
//! `DiagnosticEngine` holds only immutable collaborators and config, so one
//! engine can serve many consultations at once. Each step takes the
//! consultation's state by value and hands it back, on success inside the
//! result and on misuse inside a [`StepError`].

use std::sync::Arc;

use crate::compatibility::filter_compatible;
use crate::config::EngineConfig;
use crate::intake::{AnswerInterpreter, AnswerKind};
use crate::knowledge::{Candidate, KnowledgeBase, Retriever};
use crate::patient::PatientProfile;
use crate::pool::extract_pool;
use crate::report::{build_report, ReportInputs};
use crate::scoring::{Distribution, Scorer};
use crate::selector::QuestionSelector;
use crate::trace::{now_epoch_ms, RoundEvent, RoundTrace, TraceSink};

use super::responder::Responder;
use super::state::{
    AnswerSummary, ConsultationError, ConsultationOutcome, ConsultationState, Phase, Speaker,
    StepError, StopReason, Turn,
};

pub struct DiagnosticEngine {
    retriever: Arc<dyn Retriever>,
    knowledge: Arc<dyn KnowledgeBase>,
    config: EngineConfig,
    interpreter: AnswerInterpreter,
    trace: Option<Arc<dyn TraceSink>>,
}

impl DiagnosticEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        knowledge: Arc<dyn KnowledgeBase>,
        config: EngineConfig,
    ) -> Self {
        let interpreter = AnswerInterpreter::new(&config.intake);
        Self {
            retriever,
            knowledge,
            config,
            interpreter,
            trace: None,
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &AnswerInterpreter {
        &self.interpreter
    }

    /// Retrieve, filter for the patient, and resolve knowledge text.
    pub fn retrieve_candidates(
        &self,
        query: &str,
        k: usize,
        profile: &PatientProfile,
    ) -> Vec<Candidate> {
        let labels = self.retriever.retrieve(query, k);
        let labels = filter_compatible(&labels, profile);
        self.knowledge.resolve(&labels)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Start a consultation: create the state and seed it from the complaint.
    pub fn begin(&self, profile: PatientProfile, complaint: &str) -> ConsultationState {
        self.seed_unchecked(ConsultationState::new(profile, complaint))
    }

    /// Seed a state created with [`ConsultationState::new`].
    pub fn seed(&self, state: ConsultationState) -> Result<ConsultationState, StepError> {
        if state.phase != Phase::Seeding {
            let error = ConsultationError::AlreadySeeded(state.id.clone());
            return Err(StepError::new(state, error));
        }
        Ok(self.seed_unchecked(state))
    }

    fn seed_unchecked(&self, mut state: ConsultationState) -> ConsultationState {
        let loop_cfg = &self.config.questioning;
        let candidates =
            self.retrieve_candidates(&state.complaint, loop_cfg.retrieval_k, &state.profile);
        let pool = extract_pool(
            &candidates,
            loop_cfg.pool_per_candidate,
            loop_cfg.pool_max_total,
        );
        for phrase in pool.iter().take(loop_cfg.seed_phrases) {
            state.evidence.add_positive(phrase);
        }
        if state.evidence.positives().is_empty() && !state.complaint.is_empty() {
            let complaint = state.complaint.clone();
            state.evidence.add_positive(&complaint);
        }
        state.phase = Phase::Questioning;

        tracing::info!(
            consultation_id = %state.id,
            candidates = candidates.len(),
            seeds = state.evidence.positives().len(),
            "consultation seeded"
        );
        if let Some(event) = self.trace_round(&state, RoundEvent::Seed, &state.complaint, &candidates)
        {
            self.emit(event);
        }
        state
    }

    /// Run one questioning round: either propose the next question or stop.
    pub fn advance(
        &self,
        mut state: ConsultationState,
    ) -> Result<(ConsultationState, Turn), StepError> {
        let misuse = match (state.phase, &state.pending) {
            (Phase::Seeding, _) => Some(ConsultationError::Unseeded(state.id.clone())),
            (Phase::Terminated, _) => Some(ConsultationError::Terminated(state.id.clone())),
            (Phase::Questioning, Some(question)) => Some(ConsultationError::AwaitingAnswer {
                id: state.id.clone(),
                question: question.clone(),
            }),
            (Phase::Questioning, None) => None,
        };
        if let Some(error) = misuse {
            return Err(StepError::new(state, error));
        }

        let loop_cfg = &self.config.questioning;
        let round = state.questions_asked;
        let query = state.evidence.query_text();

        if round >= loop_cfg.max_questions {
            return Ok(self.stop(state, StopReason::QuestionBudgetExhausted, &query, &[]));
        }

        let candidates = self.retrieve_candidates(&query, loop_cfg.retrieval_k, &state.profile);
        if candidates.is_empty() {
            return Ok(self.stop(state, StopReason::NoCandidates, &query, &candidates));
        }

        if round >= loop_cfg.min_questions {
            let distribution = Scorer::new(&self.config.scoring).score(
                &candidates,
                state.evidence.positives(),
                Some(&state.profile),
                state.evidence.negatives(),
            );
            let top = distribution.top_probability();
            tracing::debug!(
                consultation_id = %state.id,
                round,
                top_confidence = top,
                "stop check"
            );
            if top >= loop_cfg.stop_confidence {
                return Ok(self.stop(state, StopReason::ConfidenceReached, &query, &candidates));
            }
        }

        let selector = QuestionSelector::new(&self.config.scoring, loop_cfg);
        let choice = selector.select_next_scored(
            &candidates,
            state.evidence.positives(),
            &state.asked,
            loop_cfg.min_questions,
        );
        let Some(choice) = choice else {
            return Ok(self.stop(state, StopReason::NoInformativeQuestion, &query, &candidates));
        };

        tracing::debug!(
            consultation_id = %state.id,
            round,
            question = %choice.phrase,
            information_gain = choice.information_gain,
            fallback = choice.fallback,
            "next question"
        );
        if let Some(mut event) = self.trace_round(&state, RoundEvent::Question, &query, &candidates)
        {
            event.question = Some(choice.phrase.clone());
            event.information_gain = Some(choice.information_gain);
            self.emit(event);
        }

        state.say(Speaker::Engine, format!("Do you have {}?", choice.phrase));
        state.pending = Some(choice.phrase.clone());
        Ok((state, Turn::Ask(choice.phrase)))
    }

    /// Apply a free-text reply to the pending question.
    ///
    /// The phrase is marked asked whatever the reply; an unclear reply adds
    /// it to neither evidence list.
    pub fn answer(
        &self,
        mut state: ConsultationState,
        reply: &str,
    ) -> Result<(ConsultationState, AnswerSummary), StepError> {
        if state.phase == Phase::Terminated {
            let error = ConsultationError::Terminated(state.id.clone());
            return Err(StepError::new(state, error));
        }
        let Some(question) = state.pending.take() else {
            let error = ConsultationError::NoPendingQuestion(state.id.clone());
            return Err(StepError::new(state, error));
        };

        let reply = reply.trim();
        if !reply.is_empty() {
            state.say(Speaker::Patient, reply);
        }

        let kind = self.interpreter.classify(reply);
        match kind {
            AnswerKind::Affirmative => {
                state.evidence.add_positive(&question);
            }
            AnswerKind::Negative => {
                state.evidence.add_negative(&question);
            }
            AnswerKind::Unclear => {}
        }
        state.asked.insert(&question);
        state.questions_asked += 1;

        let extra_symptoms =
            self.interpreter
                .extra_symptoms(reply, &question, state.evidence.positives());
        for symptom in &extra_symptoms {
            state.evidence.add_positive(symptom);
        }

        tracing::debug!(
            consultation_id = %state.id,
            question = %question,
            answer = ?kind,
            extra = extra_symptoms.len(),
            "answer recorded"
        );
        Ok((
            state,
            AnswerSummary {
                question,
                kind,
                extra_symptoms,
            },
        ))
    }

    /// Final retrieval and scoring over all evidence, then the report.
    ///
    /// Callable at any point; an unfinished consultation stops with
    /// [`StopReason::EndedByCaller`] and its pending question is dropped.
    pub fn conclude(&self, mut state: ConsultationState) -> ConsultationOutcome {
        if state.phase != Phase::Terminated {
            state.terminate(StopReason::EndedByCaller);
        }

        let query = state.evidence.query_text();
        let candidates = self.retrieve_candidates(
            &query,
            self.config.questioning.final_retrieval_k,
            &state.profile,
        );
        let distribution = Scorer::new(&self.config.scoring).score(
            &candidates,
            state.evidence.positives(),
            Some(&state.profile),
            state.evidence.negatives(),
        );
        let report = build_report(
            &ReportInputs {
                profile: &state.profile,
                positives: state.evidence.positives(),
                negatives: state.evidence.negatives(),
                candidates: &candidates,
                distribution: &distribution,
                asked: Some(&state.asked),
            },
            &self.config,
        );

        tracing::info!(
            consultation_id = %state.id,
            questions = state.questions_asked,
            stop_reason = state.stop_reason.map(|r| r.as_str()).unwrap_or("none"),
            top_label = report.top_label().unwrap_or("none"),
            top_confidence = distribution.top_probability(),
            "consultation concluded"
        );
        if self.trace.is_some() {
            let event = self.round_trace(
                &state,
                RoundEvent::Conclude,
                &query,
                &candidates,
                &distribution,
            );
            self.emit(event);
        }

        ConsultationOutcome {
            state,
            candidates,
            distribution,
            report,
        }
    }

    /// Drive a whole consultation, asking `responder` for every reply.
    pub fn run(
        &self,
        profile: PatientProfile,
        complaint: &str,
        responder: &mut dyn Responder,
    ) -> Result<ConsultationOutcome, ConsultationError> {
        let mut state = self.begin(profile, complaint);
        loop {
            let (next, turn) = self.advance(state).map_err(StepError::into_error)?;
            state = next;
            match turn {
                Turn::Ask(question) => {
                    let reply = responder.respond(&question, &state);
                    let (next, _) = self.answer(state, &reply).map_err(StepError::into_error)?;
                    state = next;
                }
                Turn::Stop(_) => break,
            }
        }
        Ok(self.conclude(state))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn stop(
        &self,
        mut state: ConsultationState,
        reason: StopReason,
        query: &str,
        candidates: &[Candidate],
    ) -> (ConsultationState, Turn) {
        state.terminate(reason);
        tracing::info!(
            consultation_id = %state.id,
            questions = state.questions_asked,
            stop_reason = reason.as_str(),
            "questioning stopped"
        );
        if let Some(mut event) = self.trace_round(&state, RoundEvent::Stop, query, candidates) {
            event.stop_reason = Some(reason.as_str().to_string());
            self.emit(event);
        }
        (state, Turn::Stop(reason))
    }

    /// Trace record scored on the full evidence; `None` when tracing is off.
    fn trace_round(
        &self,
        state: &ConsultationState,
        event: RoundEvent,
        query: &str,
        candidates: &[Candidate],
    ) -> Option<RoundTrace> {
        self.trace.as_ref()?;
        let distribution = Scorer::new(&self.config.scoring).score(
            candidates,
            state.evidence.positives(),
            Some(&state.profile),
            state.evidence.negatives(),
        );
        Some(self.round_trace(state, event, query, candidates, &distribution))
    }

    fn round_trace(
        &self,
        state: &ConsultationState,
        event: RoundEvent,
        query: &str,
        candidates: &[Candidate],
        distribution: &Distribution,
    ) -> RoundTrace {
        let top = distribution.top();
        RoundTrace {
            timestamp_ms: now_epoch_ms(),
            consultation_id: state.id.clone(),
            round: state.questions_asked,
            event,
            query: query.to_string(),
            candidates: candidates.iter().map(|c| c.label.clone()).collect(),
            top_label: top.map(|t| t.label.clone()),
            top_confidence: top.map(|t| t.probability).unwrap_or(0.0),
            entropy: distribution.entropy(),
            positives: state.evidence.positives().to_vec(),
            negatives: state.evidence.negatives().to_vec(),
            question: None,
            information_gain: None,
            stop_reason: state.stop_reason.map(|r| r.as_str().to_string()),
        }
    }

    fn emit(&self, event: RoundTrace) {
        if let Some(sink) = &self.trace {
            if let Err(err) = sink.record(event) {
                tracing::warn!(error = %err, "failed to record consultation trace");
            }
        }
    }
}
