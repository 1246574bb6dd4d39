//! Copy-down / copy-up of whole database files between master and local copy.
//!
//! Copy-down is a plain file copy: nothing writes the master while we hold the
//! lock. Copy-up reads the local database through SQLite's online backup on a
//! separate connection, so it always captures a committed state even while the
//! session keeps writing. The snapshot is staged in a fresh temp file next to
//! the master and renamed into place.

use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::fs;

/// Busy retries while a local commit holds the database lock
const SNAPSHOT_RETRIES: u32 = 500;
const SNAPSHOT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Pull the master database into the local working copy.
///
/// Returns the number of bytes copied.
pub async fn copy_down(master: &Path, local: &Path) -> Result<u64> {
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            Error::CopyDown(format!(
                "failed to create local directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let bytes = fs::copy(master, local)
        .await
        .map_err(|e| Error::CopyDown(format!("{}: {}", master.display(), e)))?;

    tracing::info!(
        master = %master.display(),
        local = %local.display(),
        bytes,
        "Copied master database to local copy"
    );
    Ok(bytes)
}

/// Publish a consistent snapshot of the local working copy over the master.
///
/// Blocking; async callers go through `spawn_blocking`. Safe to run
/// concurrently with itself. Returns the size of the published file.
pub fn copy_up(local: &Path, master: &Path) -> Result<u64> {
    if !local.is_file() {
        return Err(Error::CopyUp(format!(
            "local database not found at {}",
            local.display()
        )));
    }

    let master_dir = master
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !master_dir.is_dir() {
        return Err(Error::CopyUp(format!(
            "shared storage not reachable at {}",
            master_dir.display()
        )));
    }

    let staged = NamedTempFile::new_in(master_dir).map_err(|e| {
        Error::CopyUp(format!("failed to stage in {}: {}", master_dir.display(), e))
    })?;
    snapshot_into(local, staged.path())
        .map_err(|e| Error::CopyUp(format!("failed to snapshot {}: {}", local.display(), e)))?;

    // NamedTempFile is created owner-only; keep the master readable as before
    if let Ok(existing) = std::fs::metadata(master) {
        std::fs::set_permissions(staged.path(), existing.permissions())?;
    }
    let bytes = staged.as_file().metadata()?.len();

    staged
        .persist(master)
        .map_err(|e| Error::CopyUp(format!("{}: {}", master.display(), e.error)))?;

    tracing::debug!(
        local = %local.display(),
        master = %master.display(),
        bytes,
        "Copied local database to master"
    );
    Ok(bytes)
}

/// Copy every page of `local` into the empty database file at `target` in a
/// single backup step, so the source read lock is held for the whole copy.
fn snapshot_into(local: &Path, target: &Path) -> Result<()> {
    let source = Connection::open_with_flags(
        local,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut dest = Connection::open(target)?;

    {
        let backup = Backup::new(&source, &mut dest)?;
        let mut retries = 0;
        loop {
            match backup.step(-1)? {
                StepResult::Done => break,
                StepResult::More => {}
                _ if retries < SNAPSHOT_RETRIES => {
                    retries += 1;
                    std::thread::sleep(SNAPSHOT_RETRY_DELAY);
                }
                _ => {
                    return Err(Error::CopyUp(
                        "local database stayed locked by a writer".to_string(),
                    ))
                }
            }
        }
    }

    dest.close().map_err(|(_, e)| e)?;
    Ok(())
}

/// Copy the master into `backup_dir` under a timestamped name and prune old
/// backups so that at most `max_backups` remain.
pub async fn backup_master(master: &Path, backup_dir: &Path, max_backups: usize) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir).await?;

    let (stem, ext) = backup_name_parts(master);
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let target = backup_dir.join(format!("{stem}-{stamp}{ext}"));

    fs::copy(master, &target).await?;
    tracing::info!(backup = %target.display(), "Created master database backup");

    prune_backups(backup_dir, &stem, &ext, max_backups).await?;
    Ok(target)
}

async fn prune_backups(backup_dir: &Path, stem: &str, ext: &str, keep: usize) -> Result<()> {
    let prefix = format!("{stem}-");
    let mut backups = Vec::new();

    let mut entries = fs::read_dir(backup_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) && name.ends_with(ext) {
            backups.push(entry.path());
        }
    }

    // Timestamps sort lexicographically
    backups.sort();
    let excess = backups.len().saturating_sub(keep);
    for old in backups.into_iter().take(excess) {
        fs::remove_file(&old).await?;
        tracing::debug!(backup = %old.display(), "Removed old backup");
    }
    Ok(())
}

fn backup_name_parts(master: &Path) -> (String, String) {
    let stem = master
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "database".to_string());
    let ext = master
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_down_overwrites_local() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("shared/inventory.db");
        let local = dir.path().join("local/nested/inventory.db");
        std::fs::create_dir_all(master.parent().unwrap()).unwrap();
        std::fs::write(&master, b"master bytes").unwrap();

        copy_down(&master, &local).await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"master bytes");

        std::fs::write(&master, b"newer").unwrap();
        copy_down(&master, &local).await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"newer");
    }

    #[tokio::test]
    async fn test_copy_down_missing_master() {
        let dir = TempDir::new().unwrap();
        let err = copy_down(&dir.path().join("absent.db"), &dir.path().join("local.db"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CopyDown(_)));
    }

    fn create_db(path: &Path, names: &[&str]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode = DELETE; CREATE TABLE items (name TEXT NOT NULL);",
        )
        .unwrap();
        for name in names {
            conn.execute("INSERT INTO items (name) VALUES (?1)", [name])
                .unwrap();
        }
    }

    fn item_names(path: &Path) -> Vec<String> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap();
        let mut stmt = conn.prepare("SELECT name FROM items ORDER BY rowid").unwrap();
        let names = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap();
        names
    }

    fn integrity(path: &Path) -> String {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap();
        conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_copy_up_replaces_master_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("inventory.db");
        let local = dir.path().join("local.db");
        std::fs::write(&master, b"old").unwrap();
        create_db(&local, &["pump", "ladder"]);

        let bytes = copy_up(&local, &master).unwrap();
        assert_eq!(bytes, std::fs::metadata(&master).unwrap().len());
        assert_eq!(item_names(&master), vec!["pump", "ladder"]);

        let mut entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["inventory.db", "local.db"]);
    }

    #[test]
    fn test_copy_up_preconditions() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local.db");

        let err = copy_up(&local, &dir.path().join("inventory.db")).unwrap_err();
        assert!(err.to_string().contains("local database not found"));

        create_db(&local, &[]);
        let err = copy_up(&local, &dir.path().join("offline/inventory.db")).unwrap_err();
        assert!(matches!(err, Error::CopyUp(_)));
        assert!(err.to_string().contains("not reachable"));
    }

    #[test]
    fn test_copy_up_rejects_non_database_and_keeps_master() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("inventory.db");
        let local = dir.path().join("local.db");
        create_db(&master, &["kept"]);
        std::fs::write(&local, b"this is not sqlite").unwrap();

        let err = copy_up(&local, &master).unwrap_err();
        assert!(matches!(err, Error::CopyUp(_)));
        assert_eq!(item_names(&master), vec!["kept"]);
    }

    #[test]
    fn test_overlapping_copy_ups_both_succeed() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("inventory.db");
        let local = dir.path().join("local.db");
        let names: Vec<String> = (0..2000).map(|i| format!("item {i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        create_db(&local, &refs);

        for _ in 0..5 {
            let results: Vec<_> = std::thread::scope(|scope| {
                let first = scope.spawn(|| copy_up(&local, &master));
                let second = scope.spawn(|| copy_up(&local, &master));
                vec![first.join().unwrap(), second.join().unwrap()]
            });
            for result in results {
                result.unwrap();
            }
            assert_eq!(integrity(&master), "ok");
            assert_eq!(item_names(&master).len(), 2000);
        }
    }

    #[test]
    fn test_copy_up_during_commits_publishes_valid_database() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("inventory.db");
        let local = dir.path().join("local.db");
        create_db(&local, &[]);

        let done = std::sync::atomic::AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let conn = Connection::open(&local).unwrap();
                for i in 0..400 {
                    let tx = conn.unchecked_transaction().unwrap();
                    for j in 0..20 {
                        tx.execute(
                            "INSERT INTO items (name) VALUES (?1)",
                            [format!("crate {i}-{j} {}", "x".repeat(200))],
                        )
                        .unwrap();
                    }
                    tx.commit().unwrap();
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            });

            let mut published = 0;
            loop {
                let finished = done.load(std::sync::atomic::Ordering::SeqCst);
                copy_up(&local, &master).unwrap();
                assert_eq!(integrity(&master), "ok");
                // Whole transactions only
                assert_eq!(item_names(&master).len() % 20, 0);
                published += 1;
                if finished {
                    break;
                }
            }
            assert!(published > 1);
        });

        assert_eq!(item_names(&master).len(), 400 * 20);
    }

    #[tokio::test]
    async fn test_backup_retention() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("inventory.db");
        let backups = dir.path().join("backups");
        std::fs::write(&master, b"data").unwrap();

        for _ in 0..4 {
            backup_master(&master, &backups, 2).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let mut names: Vec<_> = std::fs::read_dir(&backups)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names
            .iter()
            .all(|n| n.starts_with("inventory-") && n.ends_with(".db")));
    }
}
