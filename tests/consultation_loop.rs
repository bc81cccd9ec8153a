use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ddx_harness::config::{EngineConfig, LoopConfig};
use ddx_harness::consultation::{
    AffirmingResponder, ConsultationError, ConsultationState, DiagnosticEngine, Phase, Responder,
    ScriptedResponder, StopReason, Turn,
};
use ddx_harness::intake::AnswerKind;
use ddx_harness::knowledge::{KnowledgeMap, Retriever};
use ddx_harness::trace::{RoundEvent, RoundTrace, TraceError, TraceSink};
use ddx_harness::{render_report_markdown, LexicalRetriever, PatientProfile};
use regex::Regex;

const CONDITIONS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/conditions.json");
const CHEST_PAIN: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/chest_pain.json");

const VAGUE: &str = "chest pain";
const SPECIFIC: &str =
    "chest pain, radiating to left arm, sweating, nausea, shortness of breath, crushing pain";

fn chest_kb() -> KnowledgeMap {
    KnowledgeMap::from_pairs([
        (
            "Costochondritis",
            "chest pain, shortness of breath, fatigue, tenderness over the ribs, pain on pressing the chest wall",
        ),
        (
            "Pericarditis",
            "chest pain, shortness of breath, fatigue, pain relieved by leaning forward, pericardial rub",
        ),
        (
            "Pulmonary Embolism",
            "chest pain, shortness of breath, fatigue, calf swelling, coughing up blood",
        ),
        (
            "Panic Disorder",
            "chest pain, shortness of breath, fatigue, sense of impending doom, trembling hands",
        ),
        (
            "Myocardial Infarction",
            "crushing pain, radiating to left arm, sweating, nausea, chest pain, shortness of breath",
        ),
        (
            "Gastroesophageal Reflux",
            "heartburn, sour taste, chest pain, regurgitation",
        ),
        ("Migraine", "headache, nausea, sensitivity to light, visual aura"),
        ("Influenza", "fever, cough, body aches, fatigue, headache"),
    ])
}

/// Ranks documents by how many distinct query words they contain.
struct OverlapRetriever {
    docs: Vec<(String, String)>,
    word: Regex,
}

impl OverlapRetriever {
    fn new(kb: &KnowledgeMap) -> Self {
        Self {
            docs: kb
                .iter()
                .map(|(l, t)| (l.to_string(), t.to_lowercase()))
                .collect(),
            word: Regex::new(r"\w+").unwrap(),
        }
    }
}

impl Retriever for OverlapRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        let query = if query.trim().is_empty() {
            "symptoms".to_string()
        } else {
            query.to_lowercase()
        };
        let tokens: HashSet<&str> = self.word.find_iter(&query).map(|m| m.as_str()).collect();
        let mut scored: Vec<(usize, &str)> = self
            .docs
            .iter()
            .map(|(label, text)| {
                let hits = tokens.iter().filter(|t| text.contains(**t)).count();
                (hits, label.as_str())
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(_, label)| label.to_string())
            .collect()
    }
}

struct EmptyRetriever;

impl Retriever for EmptyRetriever {
    fn retrieve(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Default)]
struct MemorySink {
    events: Mutex<Vec<RoundTrace>>,
}

impl TraceSink for MemorySink {
    fn record(&self, event: RoundTrace) -> Result<(), TraceError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Answers as a patient who has exactly the symptoms in `knowledge`.
struct TruthfulResponder {
    knowledge: String,
}

impl TruthfulResponder {
    fn with(knowledge: &str) -> Self {
        Self {
            knowledge: knowledge.to_lowercase(),
        }
    }
}

impl Responder for TruthfulResponder {
    fn respond(&mut self, question: &str, _state: &ConsultationState) -> String {
        if self.knowledge.contains(&question.to_lowercase()) {
            "yes".to_string()
        } else {
            "no".to_string()
        }
    }
}

const MI_SYMPTOMS: &str =
    "crushing pain, radiating to left arm, sweating, nausea, chest pain, shortness of breath";

fn lexical_engine(path: &str) -> DiagnosticEngine {
    let kb = Arc::new(KnowledgeMap::load(path).unwrap());
    let retriever = Arc::new(LexicalRetriever::build(&kb));
    DiagnosticEngine::new(retriever, kb, EngineConfig::default())
}

fn engine_with(config: EngineConfig) -> DiagnosticEngine {
    let kb = Arc::new(chest_kb());
    let retriever = Arc::new(OverlapRetriever::new(&kb));
    DiagnosticEngine::new(retriever, kb, config)
}

fn engine() -> DiagnosticEngine {
    engine_with(EngineConfig::default())
}

#[test]
fn vague_complaint_needs_more_questions_than_specific_one() {
    let engine = engine();

    let mut patient = TruthfulResponder::with(MI_SYMPTOMS);
    let vague = engine
        .run(PatientProfile::default(), VAGUE, &mut patient)
        .unwrap();
    assert_eq!(vague.state.questions_asked(), 5);
    assert_eq!(vague.state.stop_reason(), Some(StopReason::ConfidenceReached));

    let specific = engine
        .run(PatientProfile::default(), SPECIFIC, &mut patient)
        .unwrap();
    assert_eq!(specific.state.questions_asked(), 3);
    assert_eq!(
        specific.state.stop_reason(),
        Some(StopReason::ConfidenceReached)
    );

    assert!(vague.state.questions_asked() > specific.state.questions_asked());
    assert_eq!(
        specific.report.top_label(),
        Some("Myocardial Infarction")
    );
}

// Whether a vague complaint costs more questions depends on the knowledge
// base: it needs several conditions that share the vague symptom and differ
// in their specific ones.
#[test]
fn vague_complaint_needs_more_questions_with_lexical_retrieval() {
    let engine = lexical_engine(CHEST_PAIN);

    let mut patient = TruthfulResponder::with(MI_SYMPTOMS);
    let vague = engine
        .run(PatientProfile::default(), VAGUE, &mut patient)
        .unwrap();
    assert_eq!(vague.state.questions_asked(), 5);
    assert_eq!(vague.state.stop_reason(), Some(StopReason::ConfidenceReached));
    assert_eq!(
        vague.state.evidence().positives(),
        &["chest pain", "shortness of breath", "fatigue"]
    );

    let specific = engine
        .run(PatientProfile::default(), SPECIFIC, &mut patient)
        .unwrap();
    assert_eq!(specific.state.questions_asked(), 3);
    assert_eq!(
        specific.state.stop_reason(),
        Some(StopReason::ConfidenceReached)
    );
    assert_eq!(
        specific.report.top_label(),
        Some("Myocardial Infarction")
    );

    assert!(vague.state.questions_asked() > specific.state.questions_asked());
}

#[test]
fn confidence_stop_agrees_with_final_distribution() {
    let complaints = [
        VAGUE,
        SPECIFIC,
        "fatigue",
        "headache and fever",
        "fever and cough",
        "headache and nausea",
        "painful urination",
    ];
    let engines = [engine(), lexical_engine(CONDITIONS), lexical_engine(CHEST_PAIN)];

    let mut confident_stops = 0;
    for engine in &engines {
        let threshold = engine.config().questioning.stop_confidence;
        for complaint in complaints {
            let outcome = engine
                .run(
                    PatientProfile::default(),
                    complaint,
                    &mut ScriptedResponder::always("no"),
                )
                .unwrap();
            if outcome.state.stop_reason() == Some(StopReason::ConfidenceReached) {
                confident_stops += 1;
                let top = outcome.distribution.top_probability();
                assert!(
                    top >= threshold,
                    "{complaint}: stopped confident but concluded at {top}"
                );
            }
        }
    }
    assert!(confident_stops > 0);
}

#[test]
fn denied_alternatives_leave_the_remaining_candidate_on_top() {
    let engine = engine();
    let mut deny = ScriptedResponder::always("no");
    let outcome = engine
        .run(PatientProfile::default(), VAGUE, &mut deny)
        .unwrap();

    assert_eq!(outcome.state.stop_reason(), Some(StopReason::ConfidenceReached));
    assert_eq!(
        deny.questions(),
        &[
            "tenderness over the ribs",
            "pain on pressing the chest wall",
            "pain relieved by leaning forward",
            "pericardial rub",
            "calf swelling",
        ]
    );

    // Panic Disorder matches every seeded symptom and none of the denied ones.
    let top = outcome.distribution.top().unwrap();
    assert_eq!(top.label, "Panic Disorder");
    assert!((top.probability - 0.7917).abs() < 1e-3, "{}", top.probability);
    assert_eq!(outcome.state.evidence().negatives().len(), 5);
    assert!((outcome.distribution.total() - 1.0).abs() < 1e-9);
}

#[test]
fn loop_never_exceeds_question_budget() {
    let engine = engine();
    for complaint in [VAGUE, SPECIFIC, "headache and fever", ""] {
        let outcome = engine
            .run(PatientProfile::default(), complaint, &mut AffirmingResponder)
            .unwrap();
        assert!(outcome.state.questions_asked() <= 8, "{complaint}");
        assert!(outcome.state.is_terminated());
    }

    let config = EngineConfig {
        questioning: LoopConfig {
            min_questions: 1,
            max_questions: 2,
            ..LoopConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = engine_with(config);
    let mut deny = ScriptedResponder::always("no");
    let outcome = engine
        .run(PatientProfile::default(), VAGUE, &mut deny)
        .unwrap();
    assert_eq!(outcome.state.questions_asked(), 2);
    assert_eq!(
        outcome.state.stop_reason(),
        Some(StopReason::QuestionBudgetExhausted)
    );
}

#[test]
fn questions_are_never_repeated() {
    let engine = engine();
    for complaint in [VAGUE, SPECIFIC, "fatigue"] {
        let mut responder = ScriptedResponder::new(["yes", "no", "not sure"]).when_exhausted("maybe");
        engine
            .run(PatientProfile::default(), complaint, &mut responder)
            .unwrap();
        let unique: HashSet<String> = responder
            .questions()
            .iter()
            .map(|q| q.to_lowercase())
            .collect();
        assert_eq!(unique.len(), responder.questions().len(), "{complaint}");
    }
}

#[test]
fn step_api_enforces_phase_order() {
    let engine = engine();

    let unseeded = ConsultationState::new(PatientProfile::default(), VAGUE);
    let err = engine.advance(unseeded).unwrap_err();
    assert!(matches!(err.error(), ConsultationError::Unseeded(_)));
    let seeded = engine.seed(err.into_state()).unwrap();
    assert_eq!(seeded.phase(), Phase::Questioning);
    assert_eq!(
        seeded.evidence().positives(),
        &["chest pain", "shortness of breath", "fatigue"]
    );

    let err = engine.seed(seeded).unwrap_err();
    assert!(matches!(err.error(), ConsultationError::AlreadySeeded(_)));
    let err = engine.answer(err.into_state(), "yes").unwrap_err();
    assert!(matches!(err.error(), ConsultationError::NoPendingQuestion(_)));
    let seeded = err.into_state();
    assert_eq!(seeded.questions_asked(), 0);

    let (asking, turn) = engine.advance(seeded).unwrap();
    assert_eq!(turn, Turn::Ask("tenderness over the ribs".to_string()));
    assert_eq!(asking.pending_question(), Some("tenderness over the ribs"));
    let err = engine.advance(asking).unwrap_err();
    assert!(matches!(err.error(), ConsultationError::AwaitingAnswer { .. }));

    let outcome = engine.conclude(err.into_state());
    assert_eq!(outcome.state.stop_reason(), Some(StopReason::EndedByCaller));
    assert!(outcome.state.pending_question().is_none());
    let err = engine.advance(outcome.state).unwrap_err();
    assert!(matches!(err.error(), ConsultationError::Terminated(_)));
    let err = engine.answer(err.into_state(), "yes").unwrap_err();
    assert!(matches!(err.into_error(), ConsultationError::Terminated(_)));
}

#[test]
fn consultation_continues_after_a_rejected_step() {
    let engine = engine();
    let state = engine.begin(PatientProfile::default(), VAGUE);
    let (state, turn) = engine.advance(state).unwrap();
    assert_eq!(turn, Turn::Ask("tenderness over the ribs".to_string()));
    let before = state.clone();

    // Advancing again without answering is refused and changes nothing.
    let err = engine.advance(state).unwrap_err();
    let ConsultationError::AwaitingAnswer { question, .. } = err.error() else {
        panic!("expected AwaitingAnswer, got {:?}", err.error());
    };
    assert_eq!(question, "tenderness over the ribs");
    let state = err.into_state();
    assert_eq!(state, before);
    assert_eq!(state.pending_question(), Some("tenderness over the ribs"));

    let (state, summary) = engine.answer(state, "no").unwrap();
    assert_eq!(summary.question, "tenderness over the ribs");
    assert!(state.evidence().is_negative("tenderness over the ribs"));

    let (state, turn) = engine.advance(state).unwrap();
    assert_eq!(turn, Turn::Ask("pain on pressing the chest wall".to_string()));
    assert_eq!(state.questions_asked(), 1);
}

#[test]
fn mixed_reply_denies_question_and_records_extra_symptom() {
    let engine = engine();
    let state = engine.begin(PatientProfile::default(), VAGUE);
    let (state, turn) = engine.advance(state).unwrap();
    let Turn::Ask(question) = turn else {
        panic!("expected a question");
    };

    let (state, summary) = engine.answer(state, "No, but I have a fever").unwrap();
    assert_eq!(summary.kind, AnswerKind::Negative);
    assert_eq!(summary.extra_symptoms, vec!["fever".to_string()]);
    assert!(state.evidence().is_negative(&question));
    assert!(state.evidence().is_positive("fever"));
    assert!(state.asked().contains(&question));
    assert_eq!(state.questions_asked(), 1);
}

#[test]
fn unclear_reply_marks_question_asked_only() {
    let engine = engine();
    let state = engine.begin(PatientProfile::default(), VAGUE);
    let (state, turn) = engine.advance(state).unwrap();
    let Turn::Ask(question) = turn else {
        panic!("expected a question");
    };
    let positives_before = state.evidence().positives().to_vec();

    let (state, summary) = engine.answer(state, "hmm, maybe").unwrap();
    assert_eq!(summary.kind, AnswerKind::Unclear);
    assert_eq!(state.evidence().positives(), positives_before.as_slice());
    assert!(state.evidence().negatives().is_empty());
    assert!(state.asked().contains(&question));

    let (_, turn) = engine.advance(state).unwrap();
    assert_ne!(turn, Turn::Ask(question));
}

#[test]
fn empty_retrieval_stops_with_no_candidates() {
    let kb = Arc::new(chest_kb());
    let engine = DiagnosticEngine::new(Arc::new(EmptyRetriever), kb, EngineConfig::default());

    let mut responder = ScriptedResponder::always("yes");
    let outcome = engine
        .run(PatientProfile::default(), "strange tingling", &mut responder)
        .unwrap();
    assert_eq!(outcome.state.stop_reason(), Some(StopReason::NoCandidates));
    assert!(responder.questions().is_empty());
    assert_eq!(outcome.state.evidence().positives(), &["strange tingling"]);
    assert!(outcome.distribution.is_empty());
    assert!(outcome.report.impression.is_none());
    assert_eq!(
        render_report_markdown(&outcome.report),
        "Not enough data to generate a report."
    );
}

#[test]
fn trace_sink_sees_every_round() {
    let sink = Arc::new(MemorySink::default());
    let engine = engine().with_trace_sink(sink.clone());
    let mut deny = ScriptedResponder::always("no");
    let outcome = engine
        .run(PatientProfile::default(), VAGUE, &mut deny)
        .unwrap();

    let events = sink.events.lock().unwrap();
    let kinds: Vec<RoundEvent> = events.iter().map(|e| e.event).collect();
    let mut expected = vec![RoundEvent::Seed];
    expected.extend(std::iter::repeat(RoundEvent::Question).take(5));
    expected.extend([RoundEvent::Stop, RoundEvent::Conclude]);
    assert_eq!(kinds, expected);

    for event in events.iter() {
        assert_eq!(event.consultation_id, outcome.state.id());
    }
    let first_question = &events[1];
    assert_eq!(
        first_question.question.as_deref(),
        Some("tenderness over the ribs")
    );
    assert!(first_question.information_gain.unwrap() > 0.0);
    let stop = &events[6];
    assert_eq!(stop.stop_reason.as_deref(), Some("confidence_reached"));
    assert!(stop.top_confidence >= engine.config().questioning.stop_confidence);
}

#[test]
fn transcript_records_both_sides() {
    let engine = engine();
    let mut responder = ScriptedResponder::new(["yes"]);
    let outcome = engine
        .run(PatientProfile::default(), VAGUE, &mut responder)
        .unwrap();
    let text = outcome.state.transcript_text();
    assert!(text.starts_with("patient: chest pain"));
    assert!(text.contains("engine: Do you have tenderness over the ribs?"));
    assert!(text.contains("patient: yes"));
}
