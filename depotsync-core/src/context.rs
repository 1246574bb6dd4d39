//! Paths and settings for one sync session
//!
//! A [`SyncContext`] is built once at startup and handed to the lock manager,
//! copy engine and worker. Nothing in the crate keeps session paths in globals,
//! so several contexts can coexist in one process (tests rely on this).

use crate::config::{Config, SYNC_METADATA_FILE};
use crate::error::Result;
use crate::lock::LockIdentity;
use crate::status::SyncTracker;
use std::path::PathBuf;

/// Directory name for master backups inside the shared directory
pub const BACKUP_DIR: &str = "backups";

/// File locations used by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPaths {
    /// Shared storage directory
    pub shared_dir: PathBuf,
    /// Master database on shared storage
    pub master_db: PathBuf,
    /// Lock record on shared storage
    pub lock_file: PathBuf,
    /// Master backups on shared storage
    pub backup_dir: PathBuf,
    /// Local working copy
    pub local_db: PathBuf,
    /// Sync metadata record
    pub metadata: PathBuf,
}

impl SyncPaths {
    pub fn new(
        shared_dir: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        db_filename: &str,
        lock_filename: &str,
    ) -> Self {
        let shared_dir = shared_dir.into();
        let data_dir = data_dir.into();
        Self {
            master_db: shared_dir.join(db_filename),
            lock_file: shared_dir.join(lock_filename),
            backup_dir: shared_dir.join(BACKUP_DIR),
            local_db: data_dir.join(db_filename),
            metadata: data_dir.join(SYNC_METADATA_FILE),
            shared_dir,
        }
    }
}

/// Everything a session needs to know before it starts
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub paths: SyncPaths,
    pub identity: LockIdentity,
    /// Create an empty master when none exists
    pub auto_create_master: bool,
    /// Bounded copy-up queue size
    pub queue_capacity: usize,
    /// Backups to keep at session start, `None` disables backups
    pub max_backups: Option<usize>,
}

impl SyncContext {
    pub fn new(paths: SyncPaths, identity: LockIdentity) -> Self {
        Self {
            paths,
            identity,
            auto_create_master: true,
            queue_capacity: 16,
            max_backups: Some(5),
        }
    }

    /// Build a context from configuration, using the current user's identity.
    pub fn from_config(config: &Config) -> Result<Self> {
        let paths = SyncPaths::new(
            config.shared_path()?,
            Config::data_dir(),
            &config.storage.db_filename,
            &config.storage.lock_filename,
        );

        Ok(Self {
            paths,
            identity: LockIdentity::current(),
            auto_create_master: config.storage.auto_create_master,
            queue_capacity: config.sync.queue_capacity,
            max_backups: config.backup.enabled.then_some(config.backup.max_backups),
        })
    }

    pub fn with_auto_create(mut self, enabled: bool) -> Self {
        self.auto_create_master = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_backups(mut self, max_backups: Option<usize>) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn tracker(&self) -> SyncTracker {
        SyncTracker::new(&self.paths.metadata)
    }
}
