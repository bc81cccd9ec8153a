//! SQLite-backed consultation history.
//!
//! Persistence is a collaborator, not part of the loop: a failed save is
//! logged and the consultation result is still returned to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::consultation::ConsultationOutcome;
use crate::patient::{PatientProfile, Sex};
use crate::report::render_report_markdown;
use crate::scoring::Distribution;

/// What gets written for one finished consultation.
#[derive(Debug, Clone, Serialize)]
pub struct ConsultationRecord {
    pub consultation_id: String,
    pub profile: PatientProfile,
    pub symptoms: Vec<String>,
    pub negatives: Vec<String>,
    pub distribution: Distribution,
    pub stop_reason: Option<String>,
    pub questions_asked: usize,
    pub report_markdown: String,
    pub transcript: String,
}

impl ConsultationRecord {
    pub fn from_outcome(outcome: &ConsultationOutcome) -> Self {
        let state = &outcome.state;
        Self {
            consultation_id: state.id().to_string(),
            profile: state.profile().clone(),
            symptoms: state.evidence().positives().to_vec(),
            negatives: state.evidence().negatives().to_vec(),
            distribution: outcome.distribution.clone(),
            stop_reason: state.stop_reason().map(|r| r.as_str().to_string()),
            questions_asked: state.questions_asked(),
            report_markdown: render_report_markdown(&outcome.report),
            transcript: state.transcript_text(),
        }
    }
}

/// One row of `history list`.
#[derive(Debug, Clone, Serialize)]
pub struct ConsultationSummary {
    pub id: String,
    pub patient_name: Option<String>,
    pub patient_age: Option<String>,
    pub patient_sex: Sex,
    pub symptoms: Vec<String>,
    pub top_label: Option<String>,
    pub top_confidence: Option<f64>,
    pub stop_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[async_trait]
pub trait ConsultationStore: Send + Sync {
    /// Persist a consultation; returns its id.
    async fn save(&self, record: &ConsultationRecord) -> Result<String, StoreError>;
    /// Most recent first.
    async fn list(&self, limit: Option<usize>) -> Result<Vec<ConsultationSummary>, StoreError>;
    /// Returns false if no consultation had that id.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct SqliteConsultationStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConsultationStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             PRAGMA foreign_keys=ON; \
             CREATE TABLE IF NOT EXISTS patients ( \
               id TEXT PRIMARY KEY, \
               name TEXT, \
               age TEXT, \
               sex TEXT NOT NULL, \
               created_at TEXT NOT NULL \
             ); \
             CREATE TABLE IF NOT EXISTS consultations ( \
               id TEXT PRIMARY KEY, \
               patient_id TEXT NOT NULL REFERENCES patients(id), \
               symptoms TEXT NOT NULL, \
               negatives TEXT NOT NULL, \
               distribution TEXT NOT NULL, \
               top_label TEXT, \
               top_confidence REAL, \
               stop_reason TEXT, \
               questions_asked INTEGER NOT NULL, \
               report TEXT NOT NULL, \
               transcript TEXT NOT NULL, \
               created_at TEXT NOT NULL \
             ); \
             CREATE INDEX IF NOT EXISTS consultations_created_at \
               ON consultations(created_at);",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("DDX_DB_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".ddx_consultations.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}

#[async_trait]
impl ConsultationStore for SqliteConsultationStore {
    async fn save(&self, record: &ConsultationRecord) -> Result<String, StoreError> {
        let record = record.clone();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let now = Utc::now().to_rfc3339();
                let patient_id = uuid::Uuid::new_v4().to_string();
                let symptoms = to_json(&record.symptoms)?;
                let negatives = to_json(&record.negatives)?;
                let distribution = to_json(&record.distribution)?;
                let top = record.distribution.top();

                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO patients (id, name, age, sex, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        patient_id,
                        record.profile.name,
                        record.profile.age,
                        record.profile.sex.short_code(),
                        now
                    ],
                )?;
                tx.execute(
                    "INSERT INTO consultations ( \
                        id, patient_id, symptoms, negatives, distribution, \
                        top_label, top_confidence, stop_reason, questions_asked, \
                        report, transcript, created_at \
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        record.consultation_id,
                        patient_id,
                        symptoms,
                        negatives,
                        distribution,
                        top.map(|t| t.label.clone()),
                        top.map(|t| t.probability),
                        record.stop_reason,
                        record.questions_asked as i64,
                        record.report_markdown,
                        record.transcript,
                        now
                    ],
                )?;
                tx.commit()?;
                Ok(record.consultation_id.clone())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<ConsultationSummary>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let limit = limit.map(|l| l as i64).unwrap_or(-1);
                let mut stmt = conn.prepare(
                    "SELECT c.id, p.name, p.age, p.sex, c.symptoms, c.top_label, \
                            c.top_confidence, c.stop_reason, c.created_at \
                     FROM consultations c JOIN patients p ON p.id = c.patient_id \
                     ORDER BY c.created_at DESC, c.rowid DESC \
                     LIMIT ?1",
                )?;
                let mut rows = stmt.query(params![limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let symptoms: String = row.get(4)?;
                    let sex: String = row.get(3)?;
                    let created_at: String = row.get(8)?;
                    out.push(ConsultationSummary {
                        id: row.get(0)?,
                        patient_name: row.get(1)?,
                        patient_age: row.get(2)?,
                        patient_sex: Sex::parse_loose(&sex),
                        symptoms: serde_json::from_str(&symptoms)
                            .map_err(|e| StoreError::Serde(e.to_string()))?,
                        top_label: row.get(5)?,
                        top_confidence: row.get(6)?,
                        stop_reason: row.get(7)?,
                        created_at: parse_timestamp(&created_at)?,
                    });
                }
                Ok(out)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let tx = conn.transaction()?;
                let patient_id: Option<String> = tx
                    .query_row(
                        "SELECT patient_id FROM consultations WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(patient_id) = patient_id else {
                    return Ok(false);
                };
                tx.execute("DELETE FROM consultations WHERE id = ?1", params![id])?;
                tx.execute(
                    "DELETE FROM patients WHERE id = ?1 \
                     AND NOT EXISTS (SELECT 1 FROM consultations WHERE patient_id = ?1)",
                    params![patient_id],
                )?;
                tx.commit()?;
                Ok(true)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

/// Save an outcome, logging instead of failing. Returns the id on success.
pub async fn persist_outcome(
    store: &dyn ConsultationStore,
    outcome: &ConsultationOutcome,
) -> Option<String> {
    let record = ConsultationRecord::from_outcome(outcome);
    match store.save(&record).await {
        Ok(id) => {
            tracing::info!(consultation_id = %id, "consultation saved");
            Some(id)
        }
        Err(err) => {
            tracing::warn!(
                consultation_id = %record.consultation_id,
                error = %err,
                "failed to save consultation; continuing"
            );
            None
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serde(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serde(format!("bad timestamp {raw:?}: {e}")))
}
