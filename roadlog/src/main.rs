//! roadlog - accelerometer pothole logger
//!
//! Replays recorded sensor traces through the detection pipeline, lists the
//! recorded sessions, and uploads finished sessions to a server.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/roadlog/sessions.db (~/.local/share/roadlog/sessions.db)
//! - Session data files: $XDG_DATA_HOME/roadlog/sessions/ (overridable in config)
//! - Logs: $XDG_STATE_HOME/roadlog/roadlog.log (~/.local/state/roadlog/roadlog.log)
//! - Config: $XDG_CONFIG_HOME/roadlog/config.toml (~/.config/roadlog/config.toml)

mod process_lock;
mod replay;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use roadlog_core::format::format_duration;
use roadlog_core::{
    Config, Database, HttpTransport, RecordingSession, SessionStore, UploadStatus,
    UploadSynchronizer,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::process_lock::try_acquire_upload_guard;
use crate::replay::ReplayOptions;

#[derive(Parser)]
#[command(name = "roadlog")]
#[command(about = "Detect and log potholes from accelerometer traces")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed a recorded sensor trace through the detection pipeline
    Replay {
        /// Trace file (`A,<ts>,<x>,<y>,<z>` and `L,<ts>,<lat>,<lon>,<speed>` lines)
        trace: PathBuf,

        /// Start recording immediately instead of waiting for a location fix
        #[arg(long)]
        bypass_gps: bool,

        /// Override the detection threshold
        #[arg(long)]
        threshold: Option<f64>,

        /// Override the smoothing window length (minimum 2)
        #[arg(long, allow_negative_numbers = true)]
        filter_factor: Option<i64>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// List recorded sessions, newest first
    Sessions {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload finished sessions that have not been sent yet
    Upload,

    /// Show configuration, paths, and the upload backlog
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging (to file, stdout is for command output)
    let _log_guard =
        roadlog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("roadlog starting");

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::Replay {
            trace,
            bypass_gps,
            threshold,
            filter_factor,
            quiet,
        } => replay::run(
            &config,
            db,
            ReplayOptions {
                trace,
                bypass_gps,
                threshold,
                filter_factor,
                quiet,
            },
        ),
        Command::Sessions { limit, json } => list_sessions(&db, limit, json),
        Command::Upload => upload(&config, db, &db_path),
        Command::Status { json } => status(&config, &db, json),
    }
}

fn list_sessions(db: &Database, limit: usize, json: bool) -> Result<()> {
    let sessions = db.list_sessions(limit).context("failed to list sessions")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<19}  {:>10}  {:>6}  {}",
        "ID", "STARTED", "DURATION", "EVENTS", "UPLOADED"
    );
    for session in &sessions {
        println!(
            "{:>5}  {:<19}  {:>10}  {:>6}  {}",
            session.id,
            session
                .start_time
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            session_duration(session),
            session.event_count,
            if session.uploaded { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn session_duration(session: &RecordingSession) -> String {
    match session.duration().and_then(|d| d.to_std().ok()) {
        Some(duration) => format_duration(duration),
        None if session.is_finished() => "0s".to_string(),
        None => "open".to_string(),
    }
}

fn upload(config: &Config, db: Database, db_path: &Path) -> Result<()> {
    if !config.upload.is_ready() {
        bail!(
            "upload.base_url is not configured (set it in {})",
            Config::config_path().display()
        );
    }

    let Some(_guard) =
        try_acquire_upload_guard(db_path).context("failed to acquire upload lock")?
    else {
        println!("Another upload is already running.");
        return Ok(());
    };

    let transport = HttpTransport::new(&config.upload).context("invalid upload configuration")?;
    println!("Uploading to {}", transport.url());

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let synchronizer = Arc::new(UploadSynchronizer::new(Arc::new(db), transport));
    let status = runtime
        .block_on(async { Arc::clone(&synchronizer).spawn().await })
        .context("upload task ended without a result")?;

    match status {
        UploadStatus::Completed { uploaded: 0 } => {
            println!("Nothing to upload.");
            Ok(())
        }
        UploadStatus::Completed { uploaded } => {
            println!("Uploaded {} session(s).", uploaded);
            Ok(())
        }
        UploadStatus::AlreadyRunning => {
            println!("Another upload is already running.");
            Ok(())
        }
        UploadStatus::Failed(e) => Err(e).context("upload failed; sessions left unsent"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    config_path: PathBuf,
    database_path: PathBuf,
    data_dir: PathBuf,
    log_path: PathBuf,
    threshold: f64,
    filter_factor: usize,
    minimal_severity: f64,
    upload_url: Option<String>,
    total_sessions: i64,
    unsent_sessions: i64,
}

fn status(config: &Config, db: &Database, json: bool) -> Result<()> {
    let settings = config.detection.settings();
    let report = StatusReport {
        config_path: Config::config_path(),
        database_path: Config::database_path(),
        data_dir: config.storage.data_dir(),
        log_path: Config::log_path(),
        threshold: settings.threshold,
        filter_factor: settings.filter_factor,
        minimal_severity: settings.minimal_severity,
        upload_url: config.upload.url(),
        total_sessions: db.count_sessions().context("failed to count sessions")?,
        unsent_sessions: db
            .count_unsynced()
            .context("failed to count unsent sessions")?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Config:           {}", report.config_path.display());
    println!("Database:         {}", report.database_path.display());
    println!("Data files:       {}", report.data_dir.display());
    println!("Log:              {}", report.log_path.display());
    println!();
    println!("Threshold:        {}", report.threshold);
    println!("Filter factor:    {}", report.filter_factor);
    println!("Minimal severity: {}", report.minimal_severity);
    println!(
        "Upload endpoint:  {}",
        report.upload_url.as_deref().unwrap_or("not configured")
    );
    println!();
    println!("Sessions:         {}", report.total_sessions);
    println!("Unsent sessions:  {}", report.unsent_sessions);
    Ok(())
}
