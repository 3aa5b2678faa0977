mod sqlite_store;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use db::SnapshotRepository;
use events::{Event, EventBus, SessionSubscription};
use flow_core::{ConsultationOutcome, OrchestrationStatus, Process, Schedule};
use orchestrator::strategies::{LinearExecutor, SequentialSelector};
use orchestrator::{
    ConsultationResponder, NavigationTarget, OrchestrationEngine, OrchestratorConfig,
    ProcessNavigator, SessionBinding, SessionSnapshot,
};
use serde::{Deserialize, Serialize};
use sqlite_store::SqliteSessionStore;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const PHASEFLOW_DIR: &str = ".phaseflow";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_DB_NAME: &str = "phaseflow.db";

#[derive(Parser)]
#[command(name = "phaseflow")]
#[command(about = "Five-schedule process orchestration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .phaseflow/ with a default config and database
    Init,
    /// Start a new orchestration session
    Run {
        /// Use this id instead of a generated one
        #[arg(long)]
        session: Option<Uuid>,

        /// Schedule to enter first (name or 1-5)
        #[arg(long, value_parser = parse_schedule)]
        start: Option<Schedule>,
    },
    /// Continue a persisted session
    Resume { session: Uuid },
    /// List persisted sessions
    Status,
    /// Decode a flow code such as S1P123S2P12
    Decode {
        code: String,

        #[arg(long)]
        json: bool,
    },
    /// Show where a process may navigate to
    Explain {
        #[arg(value_parser = parse_process)]
        process: Process,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PhaseflowConfig {
    #[serde(default)]
    project: ProjectConfig,
    #[serde(flatten)]
    orchestrator: OrchestratorConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectConfig {
    name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "my-project".to_string(),
        }
    }
}

struct Project {
    dir: PathBuf,
    config: PhaseflowConfig,
    repo: SnapshotRepository,
}

impl Project {
    fn binding(&self) -> SessionBinding {
        SessionBinding::new(Arc::new(SqliteSessionStore::new(self.repo.clone())))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_project().await,
        Commands::Run { session, start } => {
            init_tracing();
            run(session, start).await
        }
        Commands::Resume { session } => {
            init_tracing();
            resume(session).await
        }
        Commands::Status => status().await,
        Commands::Decode { code, json } => decode(&code, json),
        Commands::Explain { process } => {
            explain(process);
            Ok(())
        }
    }
}

fn parse_schedule(s: &str) -> std::result::Result<Schedule, String> {
    Schedule::parse(&s.to_lowercase())
        .or_else(|| s.parse::<u32>().ok().and_then(Schedule::from_ordinal))
        .ok_or_else(|| {
            format!("unknown schedule '{s}' (expected knowledge, plan, implement, scale, production or 1-5)")
        })
}

fn parse_process(s: &str) -> std::result::Result<Process, String> {
    Process::parse(s).ok_or_else(|| format!("unknown process '{s}' (expected P1, P2 or P3)"))
}

async fn init_project() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let phaseflow_dir = cwd.join(PHASEFLOW_DIR);

    if phaseflow_dir.exists() {
        println!("Project already initialized at {}", phaseflow_dir.display());
        return Ok(());
    }

    println!("Initializing phaseflow in {}", cwd.display());
    tokio::fs::create_dir_all(&phaseflow_dir).await?;

    let project_name = cwd
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("my-project")
        .to_string();

    let config = PhaseflowConfig {
        project: ProjectConfig {
            name: project_name.clone(),
        },
        ..Default::default()
    };
    let config_content = toml::to_string_pretty(&config)?;
    tokio::fs::write(phaseflow_dir.join(CONFIG_FILE), config_content).await?;

    let pool = db::create_pool(&database_url(&phaseflow_dir)).await?;
    db::run_migrations(&pool).await?;

    println!();
    println!("Initialized phaseflow for '{}'", project_name);
    println!();
    println!("Created:");
    println!("  {}/", PHASEFLOW_DIR);
    println!("  ├── {}", CONFIG_FILE);
    println!("  └── {}", DEFAULT_DB_NAME);
    println!();
    println!("Next: run 'phaseflow run' to start a session");

    Ok(())
}

fn database_url(phaseflow_dir: &Path) -> String {
    format!("sqlite:{}", phaseflow_dir.join(DEFAULT_DB_NAME).display())
}

/// Read the project config, falling back to defaults when it is missing or
/// unreadable.
async fn load_config(phaseflow_dir: &Path) -> PhaseflowConfig {
    let config_path = phaseflow_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return PhaseflowConfig::default();
    }

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %config_path.display(), error = %e, "Failed to read config, using defaults");
            return PhaseflowConfig::default();
        }
    };

    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %config_path.display(), error = %e, "Invalid config, using defaults");
            PhaseflowConfig::default()
        }
    }
}

async fn open_project() -> Result<Project> {
    let cwd = std::env::current_dir()?;
    let dir = cwd.join(PHASEFLOW_DIR);
    if !dir.exists() {
        bail!("Not a phaseflow project. Run 'phaseflow init' first.");
    }

    let config = load_config(&dir).await;
    let pool = db::create_pool(&database_url(&dir))
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(Project {
        dir,
        config,
        repo: SnapshotRepository::new(pool),
    })
}

fn build_engine(
    config: &OrchestratorConfig,
    snapshot: Option<SessionSnapshot>,
) -> Result<OrchestrationEngine> {
    let executor = Arc::new(
        LinearExecutor::new().with_consultation_points(config.run.consultation_points.clone()),
    );
    let selector = Arc::new(SequentialSelector::new().with_revisit(config.engine.allow_revisit));

    let engine = match snapshot {
        Some(snapshot) => OrchestrationEngine::resume(snapshot, executor, selector)
            .context("Snapshot failed validation")?,
        None => OrchestrationEngine::new(executor, selector),
    };

    Ok(engine
        .with_config(config.engine.clone())
        .with_consultation_config(config.consultation.clone()))
}

async fn run(session: Option<Uuid>, start: Option<Schedule>) -> Result<()> {
    let project = open_project().await?;
    let binding = project.binding();

    if let Some(id) = session {
        if binding.store().load(id).await?.is_some() {
            bail!("Session {id} already exists. Use 'phaseflow resume {id}' instead.");
        }
    }

    let initial = start.unwrap_or(project.config.orchestrator.run.initial_schedule);
    let bus = EventBus::new();
    let mut engine = build_engine(&project.config.orchestrator, None)?
        .with_event_bus(bus.clone())
        .with_binding(binding);
    if let Some(id) = session {
        engine = engine.with_session_id(id);
    }

    println!();
    println!(
        "{} {} ({})",
        "phaseflow".bold(),
        project.config.project.name,
        project.dir.display()
    );
    println!("Session: {}", engine.session_id());
    println!();

    let printer = tokio::spawn(print_events(bus.subscribe_session(engine.session_id())));
    engine
        .start(initial)
        .await
        .with_context(|| format!("Failed to start at schedule {initial}"))?;

    drive(engine, bus, printer).await
}

async fn resume(session: Uuid) -> Result<()> {
    let project = open_project().await?;
    let binding = project.binding();

    let snapshot = binding
        .load(session, None)
        .await
        .with_context(|| format!("Failed to load session {session}"))?;

    let status = snapshot.state.status();
    if status.is_terminal() {
        println!(
            "Session {} is already {} ({})",
            session,
            status.as_str(),
            snapshot.state.flow_code().encode()
        );
        return Ok(());
    }

    let bus = EventBus::new();
    let engine = build_engine(&project.config.orchestrator, Some(snapshot))?
        .with_event_bus(bus.clone())
        .with_binding(binding);

    println!();
    println!(
        "Resuming {} at revision {} ({})",
        session,
        engine.revision(),
        engine.flow_code().cyan()
    );
    println!();

    let printer = tokio::spawn(print_events(bus.subscribe_session(engine.session_id())));
    drive(engine, bus, printer).await
}

/// Run the engine to completion while stdin answers consultations and
/// Ctrl+C aborts.
async fn drive(
    mut engine: OrchestrationEngine,
    bus: EventBus,
    printer: tokio::task::JoinHandle<()>,
) -> Result<()> {
    let answers = tokio::spawn(forward_answers(read_stdin_lines(), engine.responder()));

    let abort = engine.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, aborting session");
            abort.abort();
        }
    });

    let result = engine.run_to_completion().await;
    let session_id = engine.session_id();
    answers.abort();
    ctrl_c.abort();

    // The printer exits once every bus handle is gone
    drop(engine);
    drop(bus);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Event printer stopped unexpectedly");
    }

    let summary = result.with_context(|| format!("Session {session_id} failed"))?;
    println!();
    match summary.status {
        OrchestrationStatus::Terminated => println!(
            "{} after {} steps: {}",
            "Terminated".green().bold(),
            summary.steps,
            summary.flow_code
        ),
        OrchestrationStatus::Aborted => println!(
            "{} after {} steps: {}",
            "Aborted".red().bold(),
            summary.steps,
            summary.flow_code
        ),
        status => {
            println!(
                "Stopped in state {} after {} steps: {}",
                status.as_str(),
                summary.steps,
                summary.flow_code
            );
            println!("Continue with 'phaseflow resume {}'", session_id);
        }
    }

    Ok(())
}

/// Stdin is read on a plain thread; tokio's stdin cannot be interrupted.
fn read_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn forward_answers(mut lines: mpsc::UnboundedReceiver<String>, responder: ConsultationResponder) {
    while let Some(line) = lines.recv().await {
        let answer = line.trim();
        if answer.is_empty() {
            continue;
        }
        if !responder.respond(answer) {
            println!("{}", "No consultation is waiting for an answer.".dimmed());
        }
    }
}

async fn print_events(mut subscription: SessionSubscription) {
    while let Some(envelope) = subscription.recv().await {
        if let Some(line) = render_event(&envelope.event) {
            println!("{line}");
        }
    }
}

fn render_event(event: &Event) -> Option<String> {
    let line = match event {
        Event::StateChanged { state, .. } => match state.status {
            OrchestrationStatus::Running => format!(
                "  {} {} / {}  {}",
                "→".cyan(),
                state.schedule,
                state.process,
                state.flow_code.dimmed()
            ),
            _ => return None,
        },
        Event::ConsultationRaised { request, .. } => format!(
            "\n{} {}\n  ({}, {}s; type an answer and press Enter)",
            "?".yellow().bold(),
            request.prompt.bold(),
            request.kind.as_str(),
            request.timeout_seconds
        ),
        Event::ConsultationResolved { outcome, .. } => match outcome {
            ConsultationOutcome::Answered(answer) => {
                format!("  {} answered: {}", "✓".green(), answer)
            }
            ConsultationOutcome::FallbackApplied(fallback) => {
                format!("  {} no answer, using {}", "…".yellow(), fallback)
            }
            ConsultationOutcome::Cancelled => format!("  {} consultation cancelled", "✗".red()),
        },
        Event::ConsultationTimedOutMandatory {
            prompt, fallback, ..
        } => format!(
            "  {} mandatory consultation '{}' timed out, proceeding with {}",
            "!".red().bold(),
            prompt,
            fallback
        ),
        Event::TerminationRejected { missing, .. } => {
            let missing: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            if missing.is_empty() {
                format!(
                    "  {} termination rejected: production P3 must be the last step",
                    "!".yellow()
                )
            } else {
                format!(
                    "  {} termination rejected, missing: {}",
                    "!".yellow(),
                    missing.join(", ")
                )
            }
        }
        Event::Terminated { flow_code, .. } => {
            format!("  {} all schedules complete: {}", "●".green(), flow_code)
        }
        Event::Aborted { reason, .. } => format!("  {} aborted: {}", "●".red(), reason),
    };
    Some(line)
}

async fn status() -> Result<()> {
    let project = open_project().await?;
    let sessions = project.repo.find_all().await?;

    println!();
    println!("Project: {}", project.config.project.name);
    println!("Path:    {}", project.dir.display());
    println!();

    if sessions.is_empty() {
        println!("No sessions yet.");
    } else {
        println!("Sessions ({}):", sessions.len());
        for record in &sessions {
            let status = record.state.status();
            let icon = match status {
                OrchestrationStatus::NotStarted => "○".normal(),
                OrchestrationStatus::Running => "◑".cyan(),
                OrchestrationStatus::AwaitingConsultation => "◐".yellow(),
                OrchestrationStatus::Terminated => "●".green(),
                OrchestrationStatus::Aborted => "●".red(),
            };
            println!(
                "  {} {} [{}] rev {} {}",
                icon,
                record.session_id,
                status.as_str(),
                record.revision,
                record.state.flow_code().encode()
            );
        }
    }

    let resumable = project.repo.find_resumable().await?;
    if !resumable.is_empty() {
        println!();
        println!("Resumable ({}):", resumable.len());
        for record in &resumable {
            println!("  phaseflow resume {}", record.session_id);
        }
    }

    println!();
    Ok(())
}

fn decode(code: &str, json: bool) -> Result<()> {
    let positions = flow_core::decode_positions(code)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&positions)?);
        return Ok(());
    }

    println!("{} entries", positions.len());
    for (i, (schedule, process)) in positions.iter().enumerate() {
        println!(
            "  {:>3}. S{} {:<11} {}",
            i + 1,
            schedule.ordinal(),
            schedule.as_str(),
            process
        );
    }

    let canonical = flow_core::encode_positions(positions.iter().copied());
    if canonical != code {
        println!("Canonical form: {}", canonical);
    }
    Ok(())
}

fn explain(process: Process) {
    println!("From {}:", process.to_string().bold());
    for target in ProcessNavigator::allowed_targets(process) {
        let note = match target {
            NavigationTarget::Process(p) if p == process => "stay",
            NavigationTarget::Process(p) if Some(p) == ProcessNavigator::next_process(process) => {
                "forward"
            }
            NavigationTarget::Process(_) => "back",
            NavigationTarget::ExitSchedule => "return to schedule selection",
        };
        println!("  → {:<20} {}", target.to_string(), note.dimmed());
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phaseflow=info,orchestrator=info".into()),
        )
        .init();
}
