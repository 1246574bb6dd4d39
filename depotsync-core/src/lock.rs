//! Master database lock record.
//!
//! Lock strategy:
//! - A sentinel file next to the master database marks exclusive write access.
//! - The file content is the holder identity, `"<username> on <hostname>"`.
//! - A lock whose content equals our own identity is a leftover from an
//!   unclean exit on this host and is reclaimed.
//!
//! The lock file is created with its content already in place (temp file then
//! no-clobber rename), so a competing process never observes an empty lock.

use crate::error::Result;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Attempts before giving up on a lock that keeps appearing and vanishing.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Holder signature written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockIdentity(String);

impl LockIdentity {
    /// Build an identity from explicit user and host names.
    pub fn new(user: impl AsRef<str>, host: impl AsRef<str>) -> Self {
        Self(format!("{} on {}", user.as_ref(), host.as_ref()))
    }

    /// Identity of the current OS user on this machine.
    pub fn current() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(user, host)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a lock acquisition attempt.
#[derive(Debug)]
pub enum LockOutcome {
    /// We hold the lock until the guard is released or dropped.
    Acquired(MasterLock),
    /// Someone else holds the lock.
    Denied {
        /// Identity string found in the existing lock file
        holder: String,
    },
}

/// Guard for an acquired lock record.
#[derive(Debug)]
pub struct MasterLock {
    path: PathBuf,
    released: bool,
}

impl MasterLock {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            released: false,
        }
    }

    /// Path of the lock file this guard owns.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the lock file.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release(&self.path)
    }
}

impl Drop for MasterLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

/// Try to take the lock at `lock_path` for `identity`.
pub fn acquire(lock_path: &Path, identity: &LockIdentity) -> Result<LockOutcome> {
    for _ in 0..ACQUIRE_ATTEMPTS {
        match create_lock_file(lock_path, identity) {
            Ok(()) => {
                tracing::info!(path = %lock_path.display(), identity = %identity, "Lock acquired");
                return Ok(LockOutcome::Acquired(MasterLock::new(lock_path)));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        match read_holder(lock_path)? {
            // Released between our attempt and the read
            None => continue,
            Some(holder) if holder == identity.as_str() => {
                tracing::warn!(
                    path = %lock_path.display(),
                    holder = %holder,
                    "Reclaiming stale lock left by a previous session on this host"
                );
                release(lock_path)?;
            }
            Some(holder) => {
                tracing::info!(path = %lock_path.display(), holder = %holder, "Lock denied");
                return Ok(LockOutcome::Denied { holder });
            }
        }
    }

    let holder = read_holder(lock_path)?.unwrap_or_else(|| "unknown".to_string());
    Ok(LockOutcome::Denied { holder })
}

/// Delete the lock file. A missing file is not an error.
pub fn release(lock_path: &Path) -> Result<()> {
    match fs::remove_file(lock_path) {
        Ok(()) => {
            tracing::info!(path = %lock_path.display(), "Lock released");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Current lock file content, or `None` when no lock file exists.
///
/// Returned verbatim: only an exact match with our identity counts as our own
/// stale lock.
pub fn read_holder(lock_path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(lock_path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn create_lock_file(lock_path: &Path, identity: &LockIdentity) -> io::Result<()> {
    let dir = lock_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(identity.as_str().as_bytes())?;
    temp.flush()?;
    temp.persist_noclobber(lock_path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn alice() -> LockIdentity {
        LockIdentity::new("alice", "depot-pc")
    }

    #[test]
    fn test_identity_format() {
        assert_eq!(alice().as_str(), "alice on depot-pc");
        assert!(LockIdentity::current().as_str().contains(" on "));
    }

    #[test]
    fn test_acquire_creates_lock_with_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.db.lock");

        let outcome = acquire(&path, &alice()).unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired(_)));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "alice on depot-pc".to_string()
        );
    }

    #[test]
    fn test_acquire_denied_reports_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.db.lock");
        fs::write(&path, "bob on office-pc").unwrap();

        match acquire(&path, &alice()).unwrap() {
            LockOutcome::Denied { holder } => assert_eq!(holder, "bob on office-pc"),
            LockOutcome::Acquired(_) => panic!("expected lock to be denied"),
        }
        // Denial must leave the other holder's lock in place
        assert_eq!(
            read_holder(&path).unwrap().as_deref(),
            Some("bob on office-pc")
        );
    }

    #[test]
    fn test_only_exact_identity_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.db.lock");
        fs::write(&path, "alice on depot-pc\n").unwrap();

        match acquire(&path, &alice()).unwrap() {
            LockOutcome::Denied { holder } => assert_eq!(holder, "alice on depot-pc\n"),
            LockOutcome::Acquired(_) => panic!("near-match must not be treated as our lock"),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "alice on depot-pc\n");
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.db.lock");
        fs::write(&path, "alice on depot-pc").unwrap();

        let outcome = acquire(&path, &alice()).unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired(_)));
        assert_eq!(
            read_holder(&path).unwrap().as_deref(),
            Some("alice on depot-pc")
        );
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.db.lock");

        release(&path).unwrap();
        fs::write(&path, "alice on depot-pc").unwrap();
        release(&path).unwrap();
        assert!(!path.exists());
        release(&path).unwrap();
    }

    #[test]
    fn test_guard_release_and_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.db.lock");

        let LockOutcome::Acquired(guard) = acquire(&path, &alice()).unwrap() else {
            panic!("expected lock");
        };
        assert_eq!(guard.path(), path.as_path());
        guard.release().unwrap();
        assert!(!path.exists());

        let LockOutcome::Acquired(guard) = acquire(&path, &alice()).unwrap() else {
            panic!("expected lock");
        };
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_in_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone").join("inventory.db.lock");
        assert!(acquire(&path, &alice()).is_err());
    }
}
