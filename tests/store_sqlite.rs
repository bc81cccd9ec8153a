use std::sync::Arc;

use async_trait::async_trait;
use ddx_harness::config::EngineConfig;
use ddx_harness::consultation::{
    AffirmingResponder, ConsultationOutcome, DiagnosticEngine, ScriptedResponder,
};
use ddx_harness::store::{
    persist_outcome, ConsultationRecord, ConsultationStore, ConsultationSummary,
    SqliteConsultationStore, StoreError,
};
use ddx_harness::{KnowledgeMap, LexicalRetriever, PatientProfile, Sex};

fn engine() -> DiagnosticEngine {
    let kb = Arc::new(KnowledgeMap::from_pairs([
        ("Influenza", "fever, cough, body aches, fatigue, headache"),
        ("Common Cold", "cough, runny nose, sneezing, sore throat"),
        ("Migraine", "headache, nausea, sensitivity to light"),
        ("Gastroenteritis", "nausea, vomiting, diarrhea, stomach cramps"),
    ]));
    let retriever = Arc::new(LexicalRetriever::build(&kb));
    DiagnosticEngine::new(retriever, kb, EngineConfig::default())
}

fn outcome(name: &str, complaint: &str) -> ConsultationOutcome {
    let profile = PatientProfile::new(Some(name.to_string()), Some("34".into()), Sex::Female);
    engine()
        .run(profile, complaint, &mut ScriptedResponder::always("no"))
        .unwrap()
}

#[tokio::test]
async fn save_then_list_most_recent_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteConsultationStore::new(dir.path().join("history.sqlite")).unwrap();

    let first = outcome("Ana", "fever and cough");
    let second = outcome("Ben", "headache and nausea");
    let first_id = persist_outcome(&store, &first).await.unwrap();
    let second_id = persist_outcome(&store, &second).await.unwrap();
    assert_eq!(first_id, first.state.id());

    let rows = store.list(None).await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![second_id.as_str(), first_id.as_str()]);

    let ana: &ConsultationSummary = &rows[1];
    assert_eq!(ana.patient_name.as_deref(), Some("Ana"));
    assert_eq!(ana.patient_age.as_deref(), Some("34"));
    assert_eq!(ana.patient_sex, Sex::Female);
    assert_eq!(ana.symptoms, first.state.evidence().positives());
    assert_eq!(ana.top_label.as_deref(), first.report.top_label());
    assert_eq!(
        ana.stop_reason.as_deref(),
        first.state.stop_reason().map(|r| r.as_str())
    );

    assert_eq!(store.list(Some(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_removes_consultation_and_orphaned_patient() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.sqlite");
    let store = SqliteConsultationStore::new(&path).unwrap();

    let kept = persist_outcome(&store, &outcome("Ana", "fever")).await.unwrap();
    let removed = persist_outcome(&store, &outcome("Ben", "nausea")).await.unwrap();

    assert!(store.delete(&removed).await.unwrap());
    assert!(!store.delete(&removed).await.unwrap());
    assert!(!store.delete("no-such-id").await.unwrap());

    let rows = store.list(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, kept);

    let conn = rusqlite::Connection::open(&path).unwrap();
    let patients: i64 = conn
        .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
        .unwrap();
    assert_eq!(patients, 1);
}

#[tokio::test]
async fn record_carries_report_and_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("history.sqlite");
    let store = SqliteConsultationStore::new(&path).unwrap();
    assert_eq!(store.path(), path.as_path());

    let outcome = engine()
        .run(PatientProfile::default(), "fever", &mut AffirmingResponder)
        .unwrap();
    let record = ConsultationRecord::from_outcome(&outcome);
    assert!(record.report_markdown.starts_with("# Diagnostic Reasoning Report"));
    assert!(record.transcript.starts_with("patient: fever"));
    let id = store.save(&record).await.unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    let (report, transcript): (String, String) = conn
        .query_row(
            "SELECT report, transcript FROM consultations WHERE id = ?1",
            [&id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(report, record.report_markdown);
    assert_eq!(transcript, record.transcript);
}

struct FailingStore;

#[async_trait]
impl ConsultationStore for FailingStore {
    async fn save(&self, _record: &ConsultationRecord) -> Result<String, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn list(&self, _limit: Option<usize>) -> Result<Vec<ConsultationSummary>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[tokio::test]
async fn failed_save_does_not_lose_the_outcome() {
    let outcome = outcome("Ana", "fever and cough");
    assert!(persist_outcome(&FailingStore, &outcome).await.is_none());
    assert!(outcome.report.impression.is_some());

    // Saving the same consultation twice violates the primary key.
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteConsultationStore::new(dir.path().join("history.sqlite")).unwrap();
    assert!(persist_outcome(&store, &outcome).await.is_some());
    assert!(persist_outcome(&store, &outcome).await.is_none());
    assert_eq!(store.list(None).await.unwrap().len(), 1);
}
