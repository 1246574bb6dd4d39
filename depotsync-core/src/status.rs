//! Sync status tracking
//!
//! The outcome of every copy attempt is persisted to `sync-metadata.json` in
//! the local data directory so that the sync banner survives restarts.
//!
//! ## State machine
//!
//! ```text
//! unknown ──mark_started──► syncing ──success──► synced
//!                              │                   │
//!                              └──failure──► failed ◄┘ (next attempt)
//! ```
//!
//! Nothing in this module returns an error to the caller: unreadable metadata
//! reads as the `unknown` default, and failed writes are logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Stored sync state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No sync has been recorded yet
    #[default]
    Unknown,
    /// A copy is in progress
    Syncing,
    /// The last copy succeeded
    Synced,
    /// The last copy failed
    Failed,
}

/// Persisted sync metadata record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncMetadata {
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub sync_status: SyncState,
    pub failure_reason: Option<String>,
    pub local_db_modified: Option<DateTime<Utc>>,
    pub master_db_modified: Option<DateTime<Utc>>,
}

/// Status shown to the user, derived from metadata and the local file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedStatus {
    Synced,
    Pending,
    Failed,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedStatus::Synced => "synced",
            DerivedStatus::Pending => "pending",
            DerivedStatus::Failed => "failed",
        }
    }
}

/// Snapshot returned by `getSyncStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub in_sync: bool,
    pub status: DerivedStatus,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Derive the user-facing status.
///
/// `local_modified` is `None` when the local working copy does not exist yet.
pub fn derive_status(
    record: &SyncMetadata,
    local_modified: Option<DateTime<Utc>>,
) -> SyncStatusSnapshot {
    let (in_sync, status) = match local_modified {
        // Nothing local to lose
        None => (true, DerivedStatus::Synced),
        Some(_) if record.sync_status == SyncState::Failed => (false, DerivedStatus::Failed),
        Some(modified) => match (record.sync_status, record.last_successful_sync) {
            (SyncState::Synced, Some(last)) if modified <= last => (true, DerivedStatus::Synced),
            _ => (false, DerivedStatus::Pending),
        },
    };

    SyncStatusSnapshot {
        in_sync,
        status,
        last_sync_attempt: record.last_sync_attempt,
        last_successful_sync: record.last_successful_sync,
        failure_reason: if status == DerivedStatus::Failed {
            record.failure_reason.clone()
        } else {
            None
        },
    }
}

/// Modification time of a file, `None` if it cannot be read.
pub fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Reads and writes the sync metadata file.
#[derive(Debug, Clone)]
pub struct SyncTracker {
    path: PathBuf,
}

impl SyncTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, falling back to defaults when missing or corrupt.
    pub fn load(&self) -> SyncMetadata {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to read sync metadata");
                }
                return SyncMetadata::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Corrupt sync metadata, using defaults");
            SyncMetadata::default()
        })
    }

    /// Create the metadata file with defaults if it does not exist.
    pub fn ensure_exists(&self) {
        if !self.path.exists() {
            self.store(&SyncMetadata::default());
        }
    }

    /// Record the start of a copy attempt.
    pub fn mark_started(&self) -> SyncMetadata {
        self.update(|record| {
            record.sync_status = SyncState::Syncing;
            record.last_sync_attempt = Some(Utc::now());
        })
    }

    /// Record a successful copy between `local` and `master`.
    pub fn mark_succeeded(&self, local: &Path, master: &Path) -> SyncMetadata {
        let local_modified = file_modified(local);
        let master_modified = file_modified(master);
        self.update(|record| {
            record.sync_status = SyncState::Synced;
            record.last_successful_sync = Some(Utc::now());
            record.failure_reason = None;
            record.local_db_modified = local_modified;
            record.master_db_modified = master_modified;
        })
    }

    /// Record a failed copy. The last successful timestamp is kept.
    pub fn mark_failed(&self, reason: &str) -> SyncMetadata {
        self.update(|record| {
            record.sync_status = SyncState::Failed;
            record.failure_reason = Some(reason.to_string());
        })
    }

    /// Derive the status for the local working copy at `local_db`.
    pub fn check_status(&self, local_db: &Path) -> SyncStatusSnapshot {
        derive_status(&self.load(), file_modified(local_db))
    }

    fn update(&self, apply: impl FnOnce(&mut SyncMetadata)) -> SyncMetadata {
        let mut record = self.load();
        apply(&mut record);
        self.store(&record);
        record
    }

    fn store(&self, record: &SyncMetadata) {
        if let Err(e) = write_atomic(&self.path, record) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write sync metadata");
        }
    }
}

fn write_atomic(path: &Path, record: &SyncMetadata) -> crate::error::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(record)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&json)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
