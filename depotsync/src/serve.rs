//! JSON-line request loop for a running session.
//!
//! Each stdin line is one request:
//!
//! ```text
//! {"op": "createAsset", "params": {"name": "Pump", "quantity": 3}}
//! ```
//!
//! and produces exactly one stdout line:
//!
//! ```text
//! {"ok": true, "result": {...}}
//! {"ok": false, "error": "..."}
//! ```
//!
//! Stdin EOF or the first Ctrl+C shuts the session down gracefully. A second
//! Ctrl+C runs the last-resort copy-up, releases the lock and exits.

use anyhow::{Context, Result};
use depotsync_core::session::force_shutdown;
use depotsync_core::{Operation, Session, SyncOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

const GET_SYNC_STATUS: &str = "getSyncStatus";
const MANUAL_SYNC: &str = "manualSync";

#[derive(Debug, Deserialize)]
struct Request {
    op: String,
    #[serde(default)]
    params: Value,
}

/// Serve requests until stdin closes or the user interrupts, then shut down.
///
/// Returns the outcome of the final copy-up.
pub async fn serve(session: Session) -> Result<SyncOutcome> {
    let shutdown = Arc::new(Notify::new());
    install_interrupt_handler(&session, Arc::clone(&shutdown))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read request")? else {
                    tracing::info!("Request stream closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&session, &line).await;
                write_response(&response)?;
            }
            _ = shutdown.notified() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    Ok(session.shutdown().await)
}

async fn handle_line(session: &Session, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return failure(format!("malformed request: {}", e)),
    };

    match request.op.as_str() {
        GET_SYNC_STATUS => success(session.sync_status()),
        MANUAL_SYNC => success(session.manual_sync().await),
        name => match Operation::from_name(name) {
            Some(op) => match session.execute(op, &request.params) {
                Ok(result) => json!({ "ok": true, "result": result }),
                Err(e) => {
                    tracing::debug!(op = %op, error = %e, "Operation failed");
                    failure(e.to_string())
                }
            },
            None => failure(format!("unknown operation: {}", name)),
        },
    }
}

fn success(result: impl serde::Serialize) -> Value {
    match serde_json::to_value(result) {
        Ok(result) => json!({ "ok": true, "result": result }),
        Err(e) => failure(e.to_string()),
    }
}

fn failure(error: String) -> Value {
    json!({ "ok": false, "error": error })
}

fn write_response(response: &Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, response)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

/// First interrupt requests a graceful shutdown; the second forces the
/// last-resort copy-up from the signal thread and exits.
fn install_interrupt_handler(session: &Session, shutdown: Arc<Notify>) -> Result<()> {
    let paths = session.context().paths.clone();
    let tracker = session.tracker().clone();
    let interrupts = AtomicUsize::new(0);

    ctrlc::set_handler(move || {
        if interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("Shutting down, syncing to shared storage... (Ctrl+C again to force)");
            shutdown.notify_one();
            return;
        }

        eprintln!("Forcing shutdown");
        let outcome = force_shutdown(&paths, &tracker);
        if let Some(error) = outcome.error {
            eprintln!("Last-resort sync failed: {}", error);
        }
        std::process::exit(130);
    })
    .context("failed to install Ctrl+C handler")
}
