//! doyaken - agent phase pipeline orchestrator
//!
//! CLI entry point for claiming markdown tasks and driving them through
//! the phase pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use eyre::{Context, Result, eyre};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use doyaken::agent::{AgentInvoker, CommandInvoker};
use doyaken::cli::{Cli, Command, ListScope, OutputFormat};
use doyaken::config::{Config, find_workspace};
use doyaken::lock::LockInfo;
use doyaken::pipeline::{PipelineRunner, RunPlan, Session};
use doyaken::report::{Reporter, Verbosity};
use doyaken::task::{TaskStatus, TaskStore};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("doyaken")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Diagnostics go to the log file; stdout stays clean for the reporter
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("doyaken.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(verbose, "logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);

    match cli.command {
        Some(Command::Run {
            count,
            task,
            dry_run,
            model,
            agent,
        }) => {
            let workspace = require_workspace()?;
            let config = match load_config(cli.config.as_deref(), &workspace, model, agent) {
                Ok(config) => config,
                Err(e) => return Ok(config_error(e)),
            };
            cmd_run(config, workspace, RunPlan { count, task, dry_run }, verbosity).await
        }
        Some(Command::List { scope, format }) => {
            let workspace = require_workspace()?;
            let config = match load_config(cli.config.as_deref(), &workspace, None, None) {
                Ok(config) => config,
                Err(e) => return Ok(config_error(e)),
            };
            cmd_list(&config, &workspace, scope, format)
        }
        Some(Command::Init) => cmd_init(),
        None => {
            Cli::command().print_help()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Walk up from the current directory to the project root
fn require_workspace() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    find_workspace(&cwd).ok_or_else(|| {
        eyre!(
            "no .doyaken workspace found above {} (run `dk init` to create one)",
            cwd.display()
        )
    })
}

/// File chain, then environment, then CLI flags on top
fn load_config(
    explicit: Option<&Path>,
    workspace: &Path,
    model: Option<String>,
    agent: Option<String>,
) -> Result<Config> {
    let mut config = Config::load(explicit, workspace)?;
    config.apply_env()?;
    if let Some(model) = model {
        config.agent.model = Some(model);
    }
    if let Some(agent) = agent {
        config.agent.command = agent;
    }
    config.validate()?;
    Ok(config)
}

/// Broken configuration is fatal before any task is touched
fn config_error(e: eyre::Report) -> ExitCode {
    eprintln!("Configuration error: {e:#}");
    ExitCode::from(2)
}

/// Process tasks through the pipeline
async fn cmd_run(config: Config, workspace: PathBuf, plan: RunPlan, verbosity: Verbosity) -> Result<ExitCode> {
    let invoker: Arc<dyn AgentInvoker> =
        Arc::new(CommandInvoker::new(config.agent.command.clone(), config.agent.args.clone()));
    let reporter = Reporter::new(verbosity);
    let agent_id = format!("dk-{}", Uuid::now_v7().simple());

    // First ctrl-c stops between phases (or kills the in-flight
    // invocation); the task stays in doing for a later resume
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let runner = PipelineRunner::new(config, workspace, invoker, reporter, agent_id, cancel_rx);
    let summary = Session::new(runner).run(&plan).await?;

    info!(done = summary.done, aborted = summary.aborted, cancelled = summary.cancelled, "session finished");

    if summary.cancelled {
        // Conventional interrupt exit status
        return Ok(ExitCode::from(130));
    }
    if summary.aborted > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Show store contents, with claim details for tasks in doing
fn cmd_list(config: &Config, workspace: &Path, scope: ListScope, format: OutputFormat) -> Result<ExitCode> {
    let store = TaskStore::new(workspace, config.lock.staleness());
    let statuses: Vec<TaskStatus> = match scope {
        ListScope::Todo => vec![TaskStatus::Todo],
        ListScope::Doing => vec![TaskStatus::Doing],
        ListScope::Done => vec![TaskStatus::Done],
        ListScope::All => TaskStatus::ALL.to_vec(),
    };

    match format {
        OutputFormat::Json => {
            let mut tasks = Vec::new();
            for status in &statuses {
                for desc in store.list(*status)? {
                    let file = store.read(&desc)?;
                    let mut entry = serde_json::json!({
                        "id": desc.id.to_string(),
                        "status": status.dir_name(),
                        "title": file.title(),
                    });
                    if *status == TaskStatus::Doing
                        && let Some(lock) = store.locks().inspect(&desc.id)?
                    {
                        entry["lock"] = serde_json::json!({
                            "holder": lock.holder(),
                            "age_secs": lock.age.as_secs(),
                            "stale": lock.stale,
                            "holder_alive": lock.holder_alive,
                        });
                    }
                    tasks.push(entry);
                }
            }
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "tasks": tasks }))?);
        }
        OutputFormat::Text => {
            let mut any = false;
            for status in &statuses {
                let descs = store.list(*status)?;
                if descs.is_empty() {
                    continue;
                }
                if any {
                    println!();
                }
                any = true;
                println!("{status}:");
                for desc in descs {
                    let title = store.read(&desc)?.title().unwrap_or("(untitled)").to_string();
                    match store.locks().inspect(&desc.id)? {
                        Some(lock) if *status == TaskStatus::Doing => {
                            println!("  {}  {}  [{}]", desc.id, title, lock_note(&lock));
                        }
                        _ => println!("  {}  {}", desc.id, title),
                    }
                }
            }
            if !any {
                println!("No tasks found.");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn lock_note(lock: &LockInfo) -> String {
    let mut note = format!("claimed by {} {} ago", lock.holder(), format_age(lock.age));
    if lock.stale {
        note.push_str(", stale");
    } else if lock.holder_alive == Some(false) {
        note.push_str(", holder dead");
    }
    note
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Create the workspace skeleton in the current directory
fn cmd_init() -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let root = cwd.join(".doyaken");
    let fresh = !root.is_dir();

    let store = TaskStore::new(&cwd, Config::default().lock.staleness());
    store.ensure_layout()?;
    for dir in ["runs", "logs", "prompts"] {
        fs::create_dir_all(root.join(dir))?;
    }

    let manifest = root.join("doyaken.yml");
    if !manifest.exists() {
        fs::write(&manifest, MANIFEST_TEMPLATE)?;
    }

    if fresh {
        println!("Initialized doyaken workspace at {}", root.display());
    } else {
        println!("Workspace already initialized at {}", root.display());
    }
    println!();
    println!("Next steps:");
    println!("  1. Review {}", manifest.display());
    println!("  2. Drop task files into {}", root.join("tasks").join("todo").display());
    println!("  3. Run `dk run`");

    Ok(ExitCode::SUCCESS)
}

/// Starter manifest written by `dk init`
const MANIFEST_TEMPLATE: &str = r#"# doyaken project configuration
#
# Settings here override the global file at ~/.config/doyaken/doyaken.yml.
# Every key is optional; the values below are the built-in defaults.

agent:
  # Command invoked once per phase, prompt delivered on stdin
  command: claude
  args: ["-p"]
  # Fallback ladder walked on rate limits, strongest first
  models: [opus, sonnet, haiku]
  # Pin one model and disable fallback
  # model: sonnet

retry:
  max-attempts: 3
  backoff-base-ms: 1000
  backoff-cap-ms: 60000

phases:
  # Optional phases to leave out (expand and docs qualify)
  skip: [expand]
  # Per-phase timeout overrides in milliseconds
  # timeouts-ms:
  #   implement: 1800000

lock:
  # Age in seconds after which another run may break a claim
  staleness-secs: 3600

gates:
  # Shell commands run after the test, review, and verify phases; a
  # non-zero exit fails the phase
  # build: cargo build
  # test: cargo test
  # lint: cargo clippy -- -D warnings
  # format: cargo fmt --check
  timeout-ms: 600000
"#;
