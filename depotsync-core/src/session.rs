//! Session orchestration
//!
//! ## Lifecycle
//!
//! ```text
//! start:    check share ─► acquire lock ─► ensure master ─► backup master
//!                       ─► copy-down ─► open local store ─► spawn worker
//! running:  execute(op) ─► store ─► (mutating + ok) ─► queue copy-up
//! shutdown: drain worker ─► copy-up ─► safety-net copy-up ─► release lock
//! ```
//!
//! Every failure during `start` is fatal and leaves no lock behind. Failures
//! after `start` are recorded by the sync tracker and never reach callers.

use crate::context::{SyncContext, SyncPaths};
use crate::copy;
use crate::db::Store;
use crate::dispatch::MutationDispatcher;
use crate::error::{Error, Result};
use crate::lock::{self, LockOutcome, MasterLock};
use crate::ops::Operation;
use crate::status::{SyncStatusSnapshot, SyncTracker};
use crate::worker::{copy_up_and_record, run_copy_up, SyncOutcome, SyncReport, SyncTrigger, SyncWorker};
use serde_json::Value;
use tokio::sync::watch;

/// A running session against the local working copy
pub struct Session {
    ctx: SyncContext,
    tracker: SyncTracker,
    lock: MasterLock,
    store: Store,
    worker: SyncWorker,
    dispatcher: MutationDispatcher,
    created_master: bool,
}

impl Session {
    /// Run the startup sequence.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(ctx: SyncContext) -> Result<Self> {
        let paths = &ctx.paths;
        tracing::info!(
            shared = %paths.shared_dir.display(),
            identity = %ctx.identity,
            "Starting session"
        );

        if !paths.shared_dir.is_dir() {
            return Err(Error::SharedStorageUnavailable {
                path: paths.shared_dir.clone(),
            });
        }

        let lock = match lock::acquire(&paths.lock_file, &ctx.identity)? {
            LockOutcome::Acquired(lock) => lock,
            LockOutcome::Denied { holder } => return Err(Error::LockDenied { holder }),
        };

        // Only the lock holder may create the master
        let created_master = match ensure_master(&ctx) {
            Ok(created) => created,
            Err(e) => {
                release_lock(lock);
                return Err(e);
            }
        };

        if let Some(max_backups) = ctx.max_backups.filter(|_| !created_master) {
            if let Err(e) = copy::backup_master(&paths.master_db, &paths.backup_dir, max_backups).await
            {
                tracing::warn!(error = %e, "Failed to back up master database");
            }
        }

        let tracker = ctx.tracker();
        tracker.ensure_exists();

        let previous = tracker.check_status(&paths.local_db);
        if !previous.in_sync {
            tracing::warn!(
                status = previous.status.as_str(),
                reason = previous.failure_reason.as_deref().unwrap_or(""),
                "Local copy has changes that never reached the master; they will be replaced"
            );
        }

        tracker.mark_started();
        if let Err(e) = copy::copy_down(&paths.master_db, &paths.local_db).await {
            tracker.mark_failed(&e.to_string());
            release_lock(lock);
            return Err(e);
        }
        tracker.mark_succeeded(&paths.local_db, &paths.master_db);

        let (store, migrated) = match open_store(&ctx) {
            Ok(opened) => opened,
            Err(e) => {
                release_lock(lock);
                return Err(e);
            }
        };

        let worker = SyncWorker::spawn(paths.clone(), tracker.clone(), ctx.queue_capacity);
        let dispatcher = MutationDispatcher::new(worker.handle());

        if migrated {
            worker.handle().request_copy_up(SyncTrigger::SchemaUpgrade);
        }

        tracing::info!(local = %paths.local_db.display(), created_master, "Session ready");

        Ok(Self {
            tracker,
            lock,
            store,
            worker,
            dispatcher,
            created_master,
            ctx,
        })
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn dispatcher(&self) -> &MutationDispatcher {
        &self.dispatcher
    }

    /// Whether this session created the master database.
    pub fn created_master(&self) -> bool {
        self.created_master
    }

    /// Execute a store operation through the mutation dispatcher.
    pub fn execute(&self, op: Operation, params: &Value) -> Result<Value> {
        self.dispatcher
            .dispatch_with(op, || self.store.execute(op, params))
    }

    /// `getSyncStatus`
    pub fn sync_status(&self) -> SyncStatusSnapshot {
        self.tracker.check_status(&self.ctx.paths.local_db)
    }

    /// `manualSync`: copy up now, after any queued copy-ups.
    pub async fn manual_sync(&self) -> SyncOutcome {
        match self.worker.handle().sync_now().await {
            Ok(outcome) => outcome,
            Err(e) => SyncOutcome::failed(e.to_string()),
        }
    }

    /// Watch copy-up activity.
    pub fn subscribe(&self) -> watch::Receiver<SyncReport> {
        self.worker.handle().subscribe()
    }

    /// Flush everything to the master and release the lock.
    ///
    /// Returns the outcome of the final copy-up.
    pub async fn shutdown(self) -> SyncOutcome {
        let Session {
            ctx,
            tracker,
            lock,
            store,
            worker,
            dispatcher,
            ..
        } = self;

        tracing::info!("Shutting down session");
        drop(dispatcher);
        worker.shutdown().await;
        drop(store);

        let graceful = run_copy_up(&ctx.paths, &tracker, SyncTrigger::Shutdown).await;
        let last_resort = run_copy_up(&ctx.paths, &tracker, SyncTrigger::ForcedShutdown).await;
        if graceful.success && !last_resort.success {
            tracing::warn!("Safety-net copy-up failed after a successful shutdown copy-up");
        }

        release_lock(lock);
        last_resort
    }
}

/// Last-resort flush for a second interrupt.
///
/// Copies up from the calling thread and releases the lock, whatever the
/// running session is doing. May overlap a graceful shutdown copy-up.
pub fn force_shutdown(paths: &SyncPaths, tracker: &SyncTracker) -> SyncOutcome {
    tracing::warn!("Forced shutdown requested");
    let outcome = copy_up_and_record(paths, tracker, SyncTrigger::ForcedShutdown);
    if let Err(e) = lock::release(&paths.lock_file) {
        tracing::warn!(error = %e, "Failed to release lock");
    }
    outcome
}

/// Returns `true` if the master was created.
fn ensure_master(ctx: &SyncContext) -> Result<bool> {
    let master = &ctx.paths.master_db;
    if master.exists() {
        return Ok(false);
    }
    if !ctx.auto_create_master {
        return Err(Error::MasterMissing {
            path: master.clone(),
        });
    }
    tracing::info!(path = %master.display(), "Creating empty master database");
    Store::initialize(master)?;
    Ok(true)
}

fn open_store(ctx: &SyncContext) -> Result<(Store, bool)> {
    let store = Store::open(&ctx.paths.local_db)?;
    let migrated = store.migrate()?;
    Ok((store, migrated))
}

fn release_lock(lock: MasterLock) {
    if let Err(e) = lock.release() {
        tracing::warn!(error = %e, "Failed to release lock");
    }
}
