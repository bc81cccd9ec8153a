#![forbid(unsafe_code)]

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ddx_harness::consultation::{
    AffirmingResponder, ConsultationOutcome, DiagnosticEngine, Responder, ScriptedResponder, Turn,
};
use ddx_harness::intake::parse_intake;
use ddx_harness::store::{persist_outcome, ConsultationStore, SqliteConsultationStore};
use ddx_harness::{
    render_report_markdown, EngineConfig, JsonlTraceSink, KnowledgeMap, LexicalRetriever,
    PatientProfile, Sex, TraceWorker,
};

#[derive(Parser)]
#[command(name = "ddx", version, about = "Differential diagnosis harness CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive consultation over stdin
    Consult {
        #[command(flatten)]
        run: RunArgs,
        /// Opening complaint; prompted for when omitted
        complaint: Option<String>,
    },
    /// Non-interactive consultation with scripted or affirmative answers
    Diagnose {
        #[command(flatten)]
        run: RunArgs,
        complaint: String,
        /// File with one reply per line; every question is affirmed when omitted
        #[arg(long)]
        answers: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Saved consultations
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    List {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    Delete {
        #[arg(long)]
        db: Option<PathBuf>,
        id: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Knowledge base (.json or .jsonl)
    #[arg(long)]
    kb: PathBuf,
    /// Engine config (.toml or .json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    age: Option<String>,
    /// m / f / other
    #[arg(long)]
    sex: Option<String>,
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    no_save: bool,
    /// Write a JSONL trace of every round
    #[arg(long)]
    trace: Option<PathBuf>,
    /// Append to an existing trace file instead of replacing it
    #[arg(long, requires = "trace")]
    trace_append: bool,
    /// Print the full outcome as JSON instead of a markdown report
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consult { run, complaint } => {
            let complaint = match complaint {
                Some(text) => text,
                None => {
                    prompt("Describe your symptoms: ")?;
                    read_line()?.unwrap_or_default()
                }
            };
            let (engine, worker) = build_engine(&run)?;
            let profile = resolve_profile(&run, &complaint);
            let outcome = consult_interactive(&engine, profile, &complaint)?;
            finish(engine, worker, &run, outcome).await?;
        }
        Commands::Diagnose {
            run,
            complaint,
            answers,
        } => {
            let (engine, worker) = build_engine(&run)?;
            let profile = resolve_profile(&run, &complaint);
            let mut responder: Box<dyn Responder> = match answers {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)?;
                    Box::new(ScriptedResponder::new(raw.lines().map(str::to_string)))
                }
                None => Box::new(AffirmingResponder),
            };
            let outcome = engine.run(profile, &complaint, responder.as_mut())?;
            finish(engine, worker, &run, outcome).await?;
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
        }
        Commands::History { command } => match command {
            HistoryCommands::List { db, limit, json } => {
                let store = open_store(db)?;
                let rows = store.list(limit).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else if rows.is_empty() {
                    println!("no saved consultations");
                } else {
                    for row in rows {
                        println!(
                            "{}  {}  {} ({})  top: {} {}",
                            row.id,
                            row.created_at.format("%Y-%m-%d %H:%M"),
                            row.patient_name.as_deref().unwrap_or("N/A"),
                            row.patient_sex.short_code(),
                            row.top_label.as_deref().unwrap_or("-"),
                            row.top_confidence
                                .map(|p| format!("{p:.2}"))
                                .unwrap_or_default(),
                        );
                    }
                }
            }
            HistoryCommands::Delete { db, id } => {
                let store = open_store(db)?;
                if store.delete(&id).await? {
                    println!("deleted {id}");
                } else {
                    return Err(format!("no consultation with id {id}").into());
                }
            }
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn build_engine(
    run: &RunArgs,
) -> Result<(DiagnosticEngine, Option<TraceWorker>), Box<dyn std::error::Error>> {
    let config = load_config(run.config.as_deref())?;
    let knowledge = Arc::new(KnowledgeMap::load(&run.kb)?);
    if knowledge.is_empty() {
        return Err(format!("knowledge base {} has no entries", run.kb.display()).into());
    }
    let retriever = Arc::new(LexicalRetriever::build(&knowledge));
    let mut engine = DiagnosticEngine::new(retriever, knowledge, config);

    let mut worker = None;
    if let Some(path) = &run.trace {
        let (sink, handle) = if run.trace_append {
            JsonlTraceSink::append(path)?
        } else {
            JsonlTraceSink::new(path)?
        };
        engine = engine.with_trace_sink(Arc::new(sink));
        worker = Some(handle);
    }
    Ok((engine, worker))
}

/// Flags win; anything missing is taken from the opening statement.
fn resolve_profile(run: &RunArgs, complaint: &str) -> PatientProfile {
    let intake = parse_intake(complaint);
    PatientProfile::new(
        run.name.clone().or(intake.name),
        run.age.clone().or(intake.age),
        run.sex
            .as_deref()
            .map(Sex::parse_loose)
            .or(intake.sex)
            .unwrap_or_default(),
    )
}

fn consult_interactive(
    engine: &DiagnosticEngine,
    profile: PatientProfile,
    complaint: &str,
) -> Result<ConsultationOutcome, Box<dyn std::error::Error>> {
    let mut state = engine.begin(profile, complaint);
    loop {
        let (next, turn) = engine.advance(state)?;
        state = next;
        let question = match turn {
            Turn::Ask(question) => question,
            Turn::Stop(_) => break,
        };
        prompt(&format!("Do you have {question}? "))?;
        let Some(reply) = read_line()? else {
            // stdin closed: conclude with what we have.
            break;
        };
        let (next, summary) = engine.answer(state, &reply)?;
        state = next;
        if !summary.extra_symptoms.is_empty() {
            eprintln!("also noted: {}", summary.extra_symptoms.join(", "));
        }
    }
    Ok(engine.conclude(state))
}

async fn finish(
    engine: DiagnosticEngine,
    worker: Option<TraceWorker>,
    run: &RunArgs,
    outcome: ConsultationOutcome,
) -> Result<(), Box<dyn std::error::Error>> {
    // The trace worker exits once the engine's sink handle is dropped.
    drop(engine);
    if let Some(worker) = worker {
        match worker.join() {
            Ok(summary) => tracing::debug!(
                events = summary.events,
                consultations = summary.consultations,
                concluded = summary.concluded,
                "trace written"
            ),
            Err(err) => tracing::warn!(error = %err, "trace worker failed"),
        }
    }

    if run.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", render_report_markdown(&outcome.report));
    }

    if let Some(reason) = outcome.state.stop_reason() {
        eprintln!(
            "stopped: {} after {} question(s)",
            reason.as_str(),
            outcome.state.questions_asked()
        );
    }

    if !run.no_save {
        let path = run
            .db
            .clone()
            .unwrap_or_else(SqliteConsultationStore::default_path);
        match SqliteConsultationStore::new(&path) {
            Ok(store) => {
                if let Some(id) = persist_outcome(&store, &outcome).await {
                    eprintln!("saved consultation {id}");
                }
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "could not open consultation store"
                );
            }
        }
    }
    Ok(())
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteConsultationStore, Box<dyn std::error::Error>> {
    let path = db.unwrap_or_else(SqliteConsultationStore::default_path);
    Ok(SqliteConsultationStore::new(path)?)
}

fn prompt(text: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(text.as_bytes())?;
    stderr.flush()
}

/// `None` on EOF.
fn read_line() -> io::Result<Option<String>> {
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(line.trim().to_string()))
    }
}
