//! Per-round reasoning trace for consultations.
//!
//! Every engine step can emit a [`RoundTrace`]. [`JsonlTraceSink`] hands them
//! to a writer thread that appends one JSON line per event, flushes whenever
//! a consultation concludes, and reports a [`TraceSummary`] when joined.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;

use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEvent {
    Seed,
    Question,
    Stop,
    Conclude,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundTrace {
    pub timestamp_ms: i64,
    pub consultation_id: String,
    pub round: usize,
    pub event: RoundEvent,
    pub query: String,
    pub candidates: Vec<String>,
    pub top_label: Option<String>,
    pub top_confidence: f64,
    pub entropy: f64,
    pub positives: Vec<String>,
    pub negatives: Vec<String>,
    pub question: Option<String>,
    pub information_gain: Option<f64>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode trace event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("trace writer has shut down")]
    Closed,
    #[error("trace writer thread panicked")]
    Panicked,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: RoundTrace) -> Result<(), TraceError>;
}

/// What a trace writer saw before it shut down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    pub events: usize,
    /// Distinct consultation ids seen.
    pub consultations: usize,
    /// Consultations that reached the conclude step.
    pub concluded: usize,
    /// Stop reason -> number of consultations that stopped for it.
    pub stop_reasons: BTreeMap<String, usize>,
}

/// Cloneable handle feeding a JSONL writer thread.
///
/// The writer exits once every handle is dropped; join it after the engine
/// holding the sink has gone out of scope.
#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<RoundTrace>,
}

pub struct TraceWorker {
    handle: std::thread::JoinHandle<Result<TraceSummary, TraceError>>,
}

impl TraceWorker {
    pub fn join(self) -> Result<TraceSummary, TraceError> {
        self.handle.join().map_err(|_| TraceError::Panicked)?
    }
}

impl JsonlTraceSink {
    /// Truncate `path` and start a writer.
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        Self::open(path.as_ref(), false)
    }

    /// Start a writer that keeps existing lines, so several runs share one file.
    pub fn append(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        Self::open(path.as_ref(), true)
    }

    fn open(path: &Path, append: bool) -> Result<(Self, TraceWorker), TraceError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::spawn(move || write_rounds(BufWriter::new(file), receiver));
        Ok((Self { sender }, TraceWorker { handle }))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: RoundTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_rounds<W: Write>(
    mut out: W,
    rounds: mpsc::Receiver<RoundTrace>,
) -> Result<TraceSummary, TraceError> {
    let mut summary = TraceSummary::default();
    let mut seen = BTreeSet::new();

    for round in rounds {
        serde_json::to_writer(&mut out, &round)?;
        out.write_all(b"\n")?;

        summary.events += 1;
        if seen.insert(round.consultation_id.clone()) {
            summary.consultations += 1;
        }
        match round.event {
            RoundEvent::Stop => {
                let reason = round.stop_reason.unwrap_or_else(|| "unknown".to_string());
                *summary.stop_reasons.entry(reason).or_insert(0) += 1;
            }
            RoundEvent::Conclude => {
                summary.concluded += 1;
                // A finished consultation is on disk even if the host dies later.
                out.flush()?;
            }
            RoundEvent::Seed | RoundEvent::Question => {}
        }
    }
    out.flush()?;
    Ok(summary)
}

pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
