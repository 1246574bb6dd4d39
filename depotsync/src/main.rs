//! depotsync - keeps the inventory database on shared storage in step with a
//! private local working copy.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Local copy: $XDG_DATA_HOME/depotsync/inventory.db (~/.local/share/depotsync/inventory.db)
//! - Sync metadata: $XDG_DATA_HOME/depotsync/sync-metadata.json
//! - Logs: $XDG_STATE_HOME/depotsync/depotsync.<date>.log (~/.local/state/depotsync/)
//! - Config: $XDG_CONFIG_HOME/depotsync/config.toml (~/.config/depotsync/config.toml)

mod serve;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depotsync_core::lock::{self, LockIdentity};
use depotsync_core::{Config, Session, SyncContext, SyncPaths, SyncStatusSnapshot, SyncTracker};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "depotsync")]
#[command(about = "Shared-storage sync and lock manager for the inventory database")]
#[command(version)]
struct Args {
    /// Shared storage directory holding the master database (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    shared_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the sync status of the local copy without starting a session
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show resolved paths, this machine's identity and the current lock holder
    Info,
    /// Start a session and serve JSON-line requests on stdin
    Session,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(shared_path) = args.shared_path {
        config.storage.shared_path = Some(shared_path);
    }

    let _log_guard =
        depotsync_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Status { json } => show_status(&config, json),
        Command::Info => show_info(&config),
        Command::Session => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            let result = runtime.block_on(run_session(&config));
            // Stdin is read on a blocking thread that may still be parked
            runtime.shutdown_timeout(Duration::from_millis(250));
            result
        }
    }
}

fn show_status(config: &Config, json: bool) -> Result<()> {
    let tracker = SyncTracker::new(Config::sync_metadata_path());
    let status = tracker.check_status(&config.local_database_path());

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(status: &SyncStatusSnapshot) {
    let summary = if status.in_sync {
        "in sync"
    } else {
        "NOT in sync"
    };
    println!("Sync status: {} ({})", status.status.as_str(), summary);
    println!("Last attempt: {}", format_time(status.last_sync_attempt));
    println!(
        "Last successful sync: {}",
        format_time(status.last_successful_sync)
    );
    if let Some(reason) = &status.failure_reason {
        println!("Failure reason: {}", reason);
    }
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn show_info(config: &Config) -> Result<()> {
    println!("Config: {}", Config::config_path().display());
    println!("Identity: {}", LockIdentity::current());
    println!("Local copy: {}", config.local_database_path().display());
    println!("Sync metadata: {}", Config::sync_metadata_path().display());
    println!("Log file: {}", Config::log_path().display());

    let Ok(shared) = config.shared_path() else {
        println!("Shared storage: (not configured)");
        return Ok(());
    };
    let paths = SyncPaths::new(
        shared,
        Config::data_dir(),
        &config.storage.db_filename,
        &config.storage.lock_filename,
    );
    let reachable = if paths.shared_dir.is_dir() {
        "reachable"
    } else {
        "not reachable"
    };
    println!("Shared storage: {} ({})", paths.shared_dir.display(), reachable);
    println!("Master database: {}", paths.master_db.display());
    println!("Backups: {}", paths.backup_dir.display());

    let holder = lock::read_holder(&paths.lock_file).context("failed to read lock file")?;
    match holder {
        Some(holder) => println!("Locked by: {}", holder.trim_end()),
        None => println!("Locked by: (nobody)"),
    }
    Ok(())
}

async fn run_session(config: &Config) -> Result<()> {
    let ctx = SyncContext::from_config(config).context("failed to resolve shared storage")?;

    tracing::info!("depotsync session starting");
    let session = Session::start(ctx)
        .await
        .context("failed to start session")?;

    let outcome = serve::serve(session).await?;
    if let Some(error) = outcome.error {
        anyhow::bail!("final sync to shared storage failed: {}", error);
    }
    Ok(())
}
