//! Background copy-up worker
//!
//! Copy-up requests are queued on a bounded channel and executed one at a time
//! by a single task. Each attempt is recorded in the [`SyncTracker`] and
//! published on a watch channel as a [`SyncReport`].
//!
//! Requests that arrive while the queue is full are dropped: a queued job runs
//! after the mutation that triggered the dropped request, and copies the whole
//! file, so it already carries that change.

use crate::context::SyncPaths;
use crate::copy;
use crate::error::{Error, Result};
use crate::ops::Operation;
use crate::status::SyncTracker;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Why a copy-up was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A mutating operation completed
    Mutation(Operation),
    /// The user asked for a sync
    Manual,
    /// Migrations changed the local copy at startup
    SchemaUpgrade,
    /// Graceful shutdown
    Shutdown,
    /// Last-resort copy on forced or secondary shutdown
    ForcedShutdown,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Mutation(op) => write!(f, "mutation:{}", op),
            SyncTrigger::Manual => f.write_str("manual"),
            SyncTrigger::SchemaUpgrade => f.write_str("schema-upgrade"),
            SyncTrigger::Shutdown => f.write_str("shutdown"),
            SyncTrigger::ForcedShutdown => f.write_str("forced-shutdown"),
        }
    }
}

/// Result of a single copy-up, as reported to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// Latest worker activity
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Number of copy-ups the worker has finished
    pub completed: u64,
    pub last_trigger: Option<SyncTrigger>,
    pub last_outcome: Option<SyncOutcome>,
}

enum Command {
    CopyUp {
        trigger: SyncTrigger,
        reply: Option<oneshot::Sender<SyncOutcome>>,
    },
    Stop(oneshot::Sender<()>),
}

/// Copy the local working copy over the master and record the outcome.
///
/// Blocking: runs on whatever thread calls it, including a signal handler
/// thread with no runtime. Never fails; errors end up in the tracker and the
/// returned outcome.
pub fn copy_up_and_record(
    paths: &SyncPaths,
    tracker: &SyncTracker,
    trigger: SyncTrigger,
) -> SyncOutcome {
    tracker.mark_started();
    match copy::copy_up(&paths.local_db, &paths.master_db) {
        Ok(bytes) => {
            tracker.mark_succeeded(&paths.local_db, &paths.master_db);
            tracing::info!(trigger = %trigger, bytes, "Copy-up complete");
            SyncOutcome::ok()
        }
        Err(e) => {
            let reason = e.to_string();
            tracker.mark_failed(&reason);
            tracing::warn!(trigger = %trigger, error = %reason, "Copy-up failed");
            SyncOutcome::failed(reason)
        }
    }
}

/// [`copy_up_and_record`] on the blocking pool.
pub async fn run_copy_up(
    paths: &SyncPaths,
    tracker: &SyncTracker,
    trigger: SyncTrigger,
) -> SyncOutcome {
    let (paths, tracker) = (paths.clone(), tracker.clone());
    match tokio::task::spawn_blocking(move || copy_up_and_record(&paths, &tracker, trigger)).await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(trigger = %trigger, error = %e, "Copy-up task panicked");
            SyncOutcome::failed(format!("copy-up task failed: {}", e))
        }
    }
}

/// Cloneable handle for submitting copy-up requests
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
    reports: watch::Receiver<SyncReport>,
}

impl SyncHandle {
    /// Queue a copy-up without waiting for it.
    pub fn request_copy_up(&self, trigger: SyncTrigger) {
        match self.tx.try_send(Command::CopyUp {
            trigger,
            reply: None,
        }) {
            Ok(()) => tracing::debug!(trigger = %trigger, "Copy-up queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(trigger = %trigger, "Copy-up already pending, request coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(trigger = %trigger, "Sync worker stopped, copy-up not queued");
            }
        }
    }

    /// Run a copy-up after everything already queued and wait for its outcome.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::CopyUp {
                trigger: SyncTrigger::Manual,
                reply: Some(reply),
            })
            .await
            .map_err(|_| Error::WorkerStopped)?;
        rx.await.map_err(|_| Error::WorkerStopped)
    }

    /// Watch worker reports.
    pub fn subscribe(&self) -> watch::Receiver<SyncReport> {
        self.reports.clone()
    }
}

/// Owns the background copy-up task
pub struct SyncWorker {
    handle: SyncHandle,
    task: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(paths: SyncPaths, tracker: SyncTracker, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (report_tx, report_rx) = watch::channel(SyncReport::default());

        let task = tokio::spawn(worker_loop(paths, tracker, rx, report_tx));

        Self {
            handle: SyncHandle {
                tx,
                reports: report_rx,
            },
            task,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Finish queued copy-ups and stop the task.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.handle.tx.send(Command::Stop(ack)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Sync worker task ended abnormally");
        }
    }
}

async fn worker_loop(
    paths: SyncPaths,
    tracker: SyncTracker,
    mut rx: mpsc::Receiver<Command>,
    reports: watch::Sender<SyncReport>,
) {
    tracing::debug!("Sync worker started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::CopyUp { trigger, reply } => {
                let outcome = run_copy_up(&paths, &tracker, trigger).await;
                reports.send_modify(|report| {
                    report.completed += 1;
                    report.last_trigger = Some(trigger);
                    report.last_outcome = Some(outcome.clone());
                });
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Command::Stop(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }

    tracing::debug!("Sync worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::status::SyncState;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> SyncPaths {
        let shared = dir.path().join("share");
        let data = dir.path().join("data");
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::create_dir_all(&data).unwrap();
        SyncPaths::new(shared, data, "inventory.db", "inventory.db.lock")
    }

    fn seed_local(paths: &SyncPaths, site: &str) {
        let store = Store::open(&paths.local_db).unwrap();
        store.migrate().unwrap();
        store
            .execute(Operation::CreateSite, &json!({ "name": site }))
            .unwrap();
    }

    fn master_sites(paths: &SyncPaths) -> Value {
        let store = Store::open(&paths.master_db).unwrap();
        let sites = store.execute(Operation::GetSites, &Value::Null).unwrap();
        Value::Array(
            sites
                .as_array()
                .unwrap()
                .iter()
                .map(|site| site["name"].clone())
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_sync_now_copies_and_records() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        seed_local(&paths, "North Yard");
        let tracker = SyncTracker::new(&paths.metadata);

        let worker = SyncWorker::spawn(paths.clone(), tracker.clone(), 4);
        let outcome = worker.handle().sync_now().await.unwrap();
        assert_eq!(outcome, SyncOutcome::ok());
        assert_eq!(master_sites(&paths), json!(["North Yard"]));
        assert_eq!(tracker.load().sync_status, SyncState::Synced);

        let report = worker.handle().subscribe().borrow().clone();
        assert_eq!(report.completed, 1);
        assert_eq!(report.last_trigger, Some(SyncTrigger::Manual));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let tracker = SyncTracker::new(&paths.metadata);

        // No local file yet
        let worker = SyncWorker::spawn(paths, tracker.clone(), 4);
        let outcome = worker.handle().sync_now().await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("local database not found"));
        assert_eq!(tracker.load().sync_status, SyncState::Failed);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_requests_drain_before_stop() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        seed_local(&paths, "Quarry");
        let tracker = SyncTracker::new(&paths.metadata);

        let worker = SyncWorker::spawn(paths.clone(), tracker, 8);
        let handle = worker.handle();
        handle.request_copy_up(SyncTrigger::Mutation(Operation::CreateAsset));
        handle.request_copy_up(SyncTrigger::Mutation(Operation::UpdateAsset));
        worker.shutdown().await;

        assert_eq!(handle.subscribe().borrow().completed, 2);
        assert_eq!(master_sites(&paths), json!(["Quarry"]));

        // Worker is gone: fire-and-forget is a no-op, sync_now reports it
        handle.request_copy_up(SyncTrigger::Manual);
        assert!(matches!(handle.sync_now().await, Err(Error::WorkerStopped)));
    }

    #[test]
    fn test_copy_up_and_record_without_runtime() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        seed_local(&paths, "Depot");
        let tracker = SyncTracker::new(&paths.metadata);

        let outcome = copy_up_and_record(&paths, &tracker, SyncTrigger::ForcedShutdown);
        assert_eq!(outcome, SyncOutcome::ok());
        assert_eq!(tracker.load().sync_status, SyncState::Synced);
        assert_eq!(master_sites(&paths), json!(["Depot"]));
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = serde_json::to_value(SyncOutcome::ok()).unwrap();
        assert_eq!(ok, serde_json::json!({ "success": true }));

        let failed = serde_json::to_value(SyncOutcome::failed("offline")).unwrap();
        assert_eq!(
            failed,
            serde_json::json!({ "success": false, "error": "offline" })
        );
    }
}
