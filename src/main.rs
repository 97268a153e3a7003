use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use queuectl::config::{AppConfig, WorkerConfig};
use queuectl::error::QueueError;
use queuectl::lease::{PidLease, StopOutcome};
use queuectl::manager::WorkerManager;
use queuectl::queue::{DlqItem, JobListItem, Queue, StatusReport};
use queuectl::shutdown::install_shutdown_handler;
use queuectl::store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(version)]
#[command(about = "A persistent background job queue with retries and a dead letter queue")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct GlobalArgs {
    /// Path to the SQLite job database
    #[arg(long, global = true, env = "QUEUECTL_DB", default_value = "jobs.db")]
    db: PathBuf,

    /// Path to the worker manager PID marker
    #[arg(long, global = true, env = "QUEUECTL_PID_FILE", default_value = ".queuectl.pid")]
    pid_file: PathBuf,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Add a job, e.g. '{"id":"job1","command":"sleep 2"}'
    Enqueue {
        /// JSON payload with a required "command" and an optional "id"
        payload: String,
    },

    /// Start or stop the worker manager
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Show job counts per state and whether workers are running
    Status,

    /// List jobs (dead jobs are listed with `dlq list`)
    List {
        /// Only show jobs in this state (pending, processing, completed)
        #[arg(long, short = 's')]
        state: Option<String>,
    },

    /// Inspect or retry jobs in the dead letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Read or change queue settings (max_retries, backoff_base)
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// Run workers in the foreground until SIGTERM or SIGINT
    Start {
        /// Number of concurrent workers
        #[arg(long, short = 'c', default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
        count: u16,
    },
    /// Ask the running worker manager to finish its current jobs and exit
    Stop,
}

#[derive(clap::Subcommand, Debug)]
enum DlqCommands {
    /// List dead jobs
    List,
    /// Move a dead job back to pending with its attempts reset
    Retry {
        /// The job ID
        job_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigCommands {
    /// Show every stored setting
    List,
    /// Show one setting
    Get { key: String },
    /// Change a setting
    Set { key: String, value: String },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct ConfigEntryOutput {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct StopOutput {
    outcome: &'static str,
    pid: Option<u32>,
}

#[derive(Serialize)]
struct WorkerRunOutput {
    workers: usize,
    recovered: u64,
    processed: u64,
    succeeded: u64,
    retried: u64,
    dead_lettered: u64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shorten a command for table output without splitting a character.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn print_block(label: &str, text: &str) {
    println!("  {label}:");
    for line in text.lines() {
        println!("    {line}");
    }
}

// =============================================================================
// Worker Manager
// =============================================================================

async fn run_workers(
    config: AppConfig,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = JobStore::open(&config.db_path).await?;
    let lease = PidLease::new(&config.pid_file);
    let shutdown = install_shutdown_handler()?;

    tracing::info!(
        db = %config.db_path.display(),
        pid_file = %config.pid_file.display(),
        workers = config.worker.concurrency,
        "Starting queuectl workers"
    );

    let report = WorkerManager::new(store, lease, config.worker)
        .run(shutdown)
        .await?;

    match output_format {
        OutputFormat::Json => print_json(&WorkerRunOutput {
            workers: report.workers,
            recovered: report.recovered,
            processed: report.totals.processed,
            succeeded: report.totals.succeeded,
            retried: report.totals.retried,
            dead_lettered: report.totals.dead_lettered,
        })?,
        OutputFormat::Table => {
            println!("Workers stopped.");
            println!("Processed:     {}", report.totals.processed);
            println!("Succeeded:     {}", report.totals.succeeded);
            println!("Retried:       {}", report.totals.retried);
            println!("Dead-lettered: {}", report.totals.dead_lettered);
        }
    }
    Ok(())
}

fn handle_worker_stop(
    queue: &Queue,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = queue.stop_manager()?;
    let (label, pid) = match outcome {
        StopOutcome::Signalled(pid) => ("signalled", Some(pid)),
        StopOutcome::NotRunning => ("not_running", None),
        StopOutcome::StaleCleaned(pid) => ("stale_cleaned", pid),
    };

    match output_format {
        OutputFormat::Json => print_json(&StopOutput {
            outcome: label,
            pid,
        })?,
        OutputFormat::Table => match outcome {
            StopOutcome::Signalled(pid) => {
                println!("Sent shutdown request to worker manager (PID {pid}).");
                println!("Workers will exit after finishing their current jobs.");
            }
            StopOutcome::NotRunning => println!("No worker manager is running."),
            StopOutcome::StaleCleaned(Some(pid)) => {
                println!("Worker manager (PID {pid}) was not running; removed stale marker.")
            }
            StopOutcome::StaleCleaned(None) => {
                println!("Removed unreadable worker manager marker.")
            }
        },
    }
    Ok(())
}

// =============================================================================
// Queue Command Handlers
// =============================================================================

async fn handle_enqueue(
    queue: &Queue,
    payload: &str,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let receipt = queue.enqueue(payload).await?;
    match output_format {
        OutputFormat::Json => print_json(&receipt)?,
        OutputFormat::Table => {
            if receipt.requeued {
                println!("Job requeued: {}", receipt.id);
            } else {
                println!("Job enqueued: {}", receipt.id);
            }
        }
    }
    Ok(())
}

async fn handle_list(
    queue: &Queue,
    state: Option<&str>,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = queue.list(state).await?;
    match output_format {
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table => print_job_table(&jobs),
    }
    Ok(())
}

fn print_job_table(jobs: &[JobListItem]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!(
        "{:<38} {:<12} {:<9} {:<26} COMMAND",
        "JOB ID", "STATE", "ATTEMPTS", "RUN AT"
    );
    println!("{}", "-".repeat(110));
    for job in jobs {
        println!(
            "{:<38} {:<12} {:<9} {:<26} {}",
            job.id,
            job.state,
            job.attempts,
            job.run_at,
            truncate(&job.command, 30)
        );
    }
}

async fn handle_dlq_list(
    queue: &Queue,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = queue.dlq_list().await?;
    match output_format {
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table => print_dlq_table(&jobs),
    }
    Ok(())
}

fn print_dlq_table(jobs: &[DlqItem]) {
    if jobs.is_empty() {
        println!("Dead letter queue is empty.");
        return;
    }

    for job in jobs {
        println!("{} ({})", job.id, job.state);
        println!("  Command:    {}", job.command);
        println!("  Updated at: {}", job.updated_at);
        if let Some(output) = job.output.as_deref().filter(|o| !o.trim().is_empty()) {
            print_block("Output", output);
        }
        println!();
    }
    println!("{} dead job(s)", jobs.len());
}

async fn handle_dlq_retry(
    queue: &Queue,
    job_id: &str,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = queue.dlq_retry(job_id).await?;
    match output_format {
        OutputFormat::Json => print_json(&job)?,
        OutputFormat::Table => println!("Job {} moved back to pending.", job.id),
    }
    Ok(())
}

async fn handle_status(
    queue: &Queue,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = queue.status().await?;
    match output_format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_status(&report),
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    let counts = &report.counts;
    println!("Queue Status");
    println!("{}", "=".repeat(30));
    println!("{:<12} {:>8}", "pending", counts.pending);
    println!("{:<12} {:>8}", "processing", counts.processing);
    println!("{:<12} {:>8}", "completed", counts.completed);
    println!("{:<12} {:>8}", "failed", counts.failed);
    println!("{:<12} {:>8}", "dead", counts.dead);
    println!("{}", "-".repeat(30));
    println!("{:<12} {:>8}", "total", counts.total());
    println!();
    println!("Workers: {}", report.manager);
}

async fn handle_config(
    queue: &Queue,
    command: ConfigCommands,
    output_format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ConfigCommands::List => {
            let entries: BTreeMap<String, String> = queue.config_list().await?;
            match output_format {
                OutputFormat::Json => print_json(&entries)?,
                OutputFormat::Table => {
                    if entries.is_empty() {
                        println!("No config values set.");
                    }
                    for (key, value) in &entries {
                        println!("{key} = {value}");
                    }
                }
            }
        }
        ConfigCommands::Get { key } => {
            let Some(value) = queue.config_get(&key).await? else {
                return Err(format!("Config key not found: {key}").into());
            };
            match output_format {
                OutputFormat::Json => print_json(&ConfigEntryOutput { key, value })?,
                OutputFormat::Table => println!("{value}"),
            }
        }
        ConfigCommands::Set { key, value } => {
            let (key, value) = queue.config_set(&key, &value).await?;
            match output_format {
                OutputFormat::Json => print_json(&ConfigEntryOutput { key, value })?,
                OutputFormat::Table => println!("{key} = {value}"),
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

async fn open_queue(db: &Path, pid_file: &Path) -> Result<Queue, Box<dyn std::error::Error>> {
    let store = JobStore::open(db).await?;
    Ok(Queue::new(store, PidLease::new(pid_file)))
}

/// Release the store connection, then report the command's result.
async fn finish(
    queue: &Queue,
    result: Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    queue.close().await;
    result
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let GlobalArgs {
        db,
        pid_file,
        output,
    } = args.global;

    let starts_workers = matches!(
        args.command,
        Commands::Worker {
            command: WorkerCommands::Start { .. }
        }
    );
    init_tracing(if starts_workers { "info" } else { "warn" });

    match args.command {
        Commands::Worker { command } => match command {
            WorkerCommands::Start { count } => {
                let mut config = AppConfig::new(db, pid_file);
                config.worker = WorkerConfig::default().with_concurrency(usize::from(count));
                run_workers(config, output).await
            }
            WorkerCommands::Stop => {
                let queue = open_queue(&db, &pid_file).await?;
                finish(&queue, handle_worker_stop(&queue, output)).await
            }
        },
        Commands::Enqueue { payload } => {
            let queue = open_queue(&db, &pid_file).await?;
            finish(&queue, handle_enqueue(&queue, &payload, output).await).await
        }
        Commands::Status => {
            let queue = open_queue(&db, &pid_file).await?;
            finish(&queue, handle_status(&queue, output).await).await
        }
        Commands::List { state } => {
            let queue = open_queue(&db, &pid_file).await?;
            finish(&queue, handle_list(&queue, state.as_deref(), output).await).await
        }
        Commands::Dlq { command } => {
            let queue = open_queue(&db, &pid_file).await?;
            let result = match command {
                DlqCommands::List => handle_dlq_list(&queue, output).await,
                DlqCommands::Retry { job_id } => handle_dlq_retry(&queue, &job_id, output).await,
            };
            finish(&queue, result).await
        }
        Commands::Config { command } => {
            let queue = open_queue(&db, &pid_file).await?;
            finish(&queue, handle_config(&queue, command, output).await).await
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        match e.downcast_ref::<QueueError>() {
            Some(QueueError::AlreadyRunning(pid)) => {
                eprintln!("Error: worker manager already running (PID {pid})");
                eprintln!("Hint: stop it first with `queuectl worker stop`");
            }
            _ => eprintln!("Error: {e}"),
        }
        std::process::exit(1);
    }
}
