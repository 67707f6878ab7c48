//! calllog-sync - reliable delivery of call events to an HTTP endpoint
//!
//! Calls are recorded in a durable local queue and POSTed to the configured
//! endpoint, retrying transient failures with exponential backoff.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/calllog-sync/calllog.db (~/.local/share/calllog-sync/calllog.db)
//! - Logs: $XDG_STATE_HOME/calllog-sync/calllog-sync.log.YYYY-MM-DD (~/.local/state/calllog-sync/), rotated daily
//! - Config: $XDG_CONFIG_HOME/calllog-sync/config.toml (~/.config/calllog-sync/config.toml)

mod process_lock;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use calllog_sync_core::{
    import_call_log, spawn_ingest, CallLogView, CallRecord, CallStateChange, Config, Database,
    DeliveryWorker, EventSource, JsonCallLog, Settings, SyncQueue, SyncStatus, SyncSummary,
};
use clap::{Parser, Subcommand};
use process_lock::acquire_worker_guard;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "calllog-sync")]
#[command(about = "Deliver phone call events to an HTTP endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the delivery worker until interrupted
    Run {
        /// Read call-state transitions from stdin, one JSON object per line
        #[arg(long)]
        events: bool,

        /// Rescan a call-log export before delivering
        #[arg(long, value_name = "FILE")]
        import: Option<PathBuf>,
    },

    /// Save the endpoint URL call events are POSTed to
    SetEndpoint {
        /// http(s) URL
        url: String,
    },

    /// Rescan a call-log export and queue any calls not yet known
    Import {
        /// JSON array of call-log entries
        file: PathBuf,
    },

    /// List queued calls, newest first
    List {
        /// Only show calls whose name or number contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Show the endpoint and per-status record counts
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = calllog_sync_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let db = Arc::new(db);

    match cli.command {
        Command::Run { events, import } => run_worker(&config, &db_path, db, events, import),
        Command::SetEndpoint { url } => set_endpoint(db, &url),
        Command::Import { file } => import(db, &file),
        Command::List { filter } => list(&db, filter.as_deref()),
        Command::Status => status(db, &db_path),
    }
}

fn set_endpoint(db: Arc<Database>, url: &str) -> Result<()> {
    let saved = Settings::new(db).set_endpoint_url(url)?;
    println!("API URL saved: {}", saved);
    Ok(())
}

fn import(db: Arc<Database>, file: &Path) -> Result<()> {
    // A worker in another process may be mid-delivery; leave its claim alone
    let queue = SyncQueue::attach(db);
    let summary = import_call_log(&JsonCallLog::new(file), &queue)?;

    println!("Scanned:    {}", summary.scanned);
    println!("Queued:     {}", summary.admitted);
    println!("Duplicates: {}", summary.duplicates);
    if summary.skipped > 0 {
        println!("Skipped:    {}", summary.skipped);
    }
    Ok(())
}

fn list(db: &Database, filter: Option<&str>) -> Result<()> {
    let view = CallLogView::load(db).context("failed to load call records")?;
    let records: Vec<&CallRecord> = match filter {
        Some(text) => view.filter(text),
        None => view.records().iter().collect(),
    };

    if records.is_empty() {
        println!("No calls");
        return Ok(());
    }

    for record in records {
        println!("{}", format_row(record));
    }
    Ok(())
}

fn format_row(record: &CallRecord) -> String {
    let when = chrono::DateTime::from_timestamp_millis(record.timestamp)
        .map(|at| {
            at.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| record.timestamp.to_string());

    let mut row = format!(
        "{:<16}  {:<8}  {:>5}s  {:<16}  {}",
        when,
        record.direction,
        record.duration_sec,
        record.sync_status,
        record.display_name()
    );
    if record.sync_status == SyncStatus::FailedPermanent {
        if let Some(error) = &record.last_error {
            row.push_str(&format!("  ({})", error));
        }
    }
    row
}

fn status(db: Arc<Database>, db_path: &Path) -> Result<()> {
    let summary = SyncSummary::load(&db).context("failed to count records")?;
    let endpoint = Settings::new(db).endpoint_url()?;

    println!("Database:         {}", db_path.display());
    println!(
        "Log file:         {}",
        calllog_sync_core::logging::log_file_path().display()
    );
    println!(
        "Endpoint:         {}",
        endpoint.as_deref().unwrap_or("(not set)")
    );
    println!("Total:            {}", summary.total());
    for status in [
        SyncStatus::Pending,
        SyncStatus::InFlight,
        SyncStatus::Synced,
        SyncStatus::FailedPermanent,
    ] {
        println!(
            "{:<17} {}",
            format!("{}:", status),
            summary.count(status)
        );
    }
    Ok(())
}

fn run_worker(
    config: &Config,
    db_path: &Path,
    db: Arc<Database>,
    events: bool,
    import: Option<PathBuf>,
) -> Result<()> {
    let _worker_guard = acquire_worker_guard(db_path).context("failed to acquire process lock")?;

    let queue = SyncQueue::open(db.clone()).context("failed to open queue")?;
    let settings = Settings::new(db);
    if settings.endpoint_url()?.is_none() {
        println!("No API URL set; calls will queue until one is saved with `set-endpoint`.");
    }

    if let Some(file) = import {
        let summary = import_call_log(&JsonCallLog::new(&file), &queue)?;
        println!(
            "Imported {} new call(s) from {}",
            summary.admitted,
            file.display()
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        let _ = shutdown_tx.send(true);
    })
    .context("failed to set Ctrl-C handler")?;

    let stats = runtime.block_on(async {
        let worker = DeliveryWorker::new(queue.clone(), settings, &config.delivery)?;

        if events {
            let (source, rx) = EventSource::new();
            let ingest = spawn_ingest(rx, queue.clone());
            thread::spawn(move || read_events(source));
            tokio::spawn(async move {
                if let Ok(stats) = ingest.await {
                    tracing::info!(
                        received = stats.received,
                        admitted = stats.admitted,
                        "Event input closed"
                    );
                }
            });
        }

        println!("Delivering call events (Ctrl-C to stop)");
        anyhow::Ok(worker.run(shutdown_rx).await)
    })?;

    println!("Synced:  {}", stats.synced);
    println!("Retried: {}", stats.retried);
    println!("Failed:  {}", stats.failed);
    Ok(())
}

/// Feed JSON-lines call-state transitions from stdin into `source`.
fn read_events(mut source: EventSource) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read event input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CallStateChange>(&line) {
            Ok(change) => {
                source.on_state_change(change);
            }
            Err(e) => tracing::warn!(error = %e, line = %line, "Ignoring malformed call-state event"),
        }
    }
}
