// Run lock: at most one processing run per database
//
// The lock is a JSON file next to the database, created with create-new
// semantics. The holder rewrites heartbeatAt between files; a lock whose
// heartbeat is older than the stale window belongs to a crashed run and is
// reclaimed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{RUN_LOCK_EXTENSION, RUN_LOCK_STALE_SECONDS};
use crate::db::schema::{format_timestamp, parse_timestamp};
use crate::error::{MediaFlowError, Result};
use crate::jobs::worker_id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub owner: String,
    pub token: String,
    pub acquired_at: String,
    pub heartbeat_at: String,
}

impl LockInfo {
    fn heartbeat(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.heartbeat_at).ok()
    }
}

/// `<db>.lock` next to the database file.
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "mediaflow".to_string());
    db_path.with_file_name(format!("{}.{}", name, RUN_LOCK_EXTENSION))
}

/// Read the current lock holder, if any.
pub fn read_lock(path: &Path) -> Result<Option<LockInfo>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MediaFlowError::Io(e)),
    }
}

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with_stale(path, Duration::seconds(RUN_LOCK_STALE_SECONDS))
    }

    pub fn acquire_with_stale(path: &Path, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let now = format_timestamp(Utc::now());
        let info = LockInfo {
            owner: worker_id(),
            token: Uuid::new_v4().to_string(),
            acquired_at: now.clone(),
            heartbeat_at: now,
        };

        // Second attempt only after reclaiming a stale lock
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
                    file.sync_all()?;
                    log::debug!("Acquired run lock {} ({})", path.display(), info.token);
                    return Ok(Self { path: path.to_path_buf(), info, released: false });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = read_lock(path)?;
                    if attempt == 0 && is_stale(path, holder.as_ref(), stale_after) {
                        log::warn!(
                            "Reclaiming stale run lock {} held by {}",
                            path.display(),
                            holder.as_ref().map(|h| h.owner.as_str()).unwrap_or("unknown")
                        );
                        if reclaim_stale(path, holder.as_ref())? {
                            continue;
                        }
                        let current = read_lock(path)?;
                        return Err(MediaFlowError::RunInProgress(
                            current
                                .map(|h| format!("held by {} since {}", h.owner, h.acquired_at))
                                .unwrap_or_else(|| "another run reclaimed the stale lock first".to_string()),
                        ));
                    }
                    let owner = holder
                        .map(|h| format!("held by {} since {}", h.owner, h.acquired_at))
                        .unwrap_or_else(|| format!("lock file {} exists", path.display()));
                    return Err(MediaFlowError::RunInProgress(owner));
                }
                Err(e) => return Err(MediaFlowError::Io(e)),
            }
        }

        Err(MediaFlowError::RunInProgress(format!(
            "lock file {} was re-created by another run",
            path.display()
        )))
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Refresh heartbeatAt. Fails if another run has taken the lock over.
    pub fn heartbeat(&mut self) -> Result<()> {
        self.ensure_owned()?;
        self.info.heartbeat_at = format_timestamp(Utc::now());
        fs::write(&self.path, serde_json::to_string_pretty(&self.info)?)?;
        Ok(())
    }

    /// Release explicitly; dropping the lock does the same.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn ensure_owned(&self) -> Result<()> {
        match read_lock(&self.path)? {
            Some(holder) if holder.token == self.info.token => Ok(()),
            Some(holder) => Err(MediaFlowError::RunInProgress(format!(
                "run lock taken over by {}",
                holder.owner
            ))),
            None => Err(MediaFlowError::RunLockLost(format!(
                "{} disappeared",
                self.path.display()
            ))),
        }
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // Never delete a lock that another run has reclaimed
        if let Some(holder) = read_lock(&self.path)? {
            if holder.token == self.info.token {
                fs::remove_file(&self.path)?;
                log::debug!("Released run lock {}", self.path.display());
            }
        }
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

/// Move the stale lock aside and check it is the one we judged stale. If a
/// competing run already replaced it, put that lock back and report `false`.
fn reclaim_stale(path: &Path, stale: Option<&LockInfo>) -> Result<bool> {
    let aside = path.with_extension(format!("{}.{}", RUN_LOCK_EXTENSION, Uuid::new_v4().simple()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(MediaFlowError::Io(e)),
    }

    let moved = read_lock(&aside)?;
    let expected_token = stale.map(|h| h.token.as_str());
    if moved.as_ref().map(|h| h.token.as_str()) == expected_token {
        fs::remove_file(&aside)?;
        return Ok(true);
    }

    // hard_link only succeeds while the lock path is free
    if let Err(e) = fs::hard_link(&aside, path) {
        log::warn!("Could not restore run lock {}: {}", path.display(), e);
    }
    fs::remove_file(&aside)?;
    Ok(false)
}

/// Stale when the heartbeat is older than `stale_after`. Unreadable lock
/// files fall back to the file's modification time.
fn is_stale(path: &Path, holder: Option<&LockInfo>, stale_after: Duration) -> bool {
    let last_seen = holder.and_then(|h| h.heartbeat()).or_else(|| {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    });

    match last_seen {
        Some(t) => Utc::now() - t > stale_after,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_sits_next_to_db() {
        assert_eq!(
            lock_path_for(Path::new("/data/media_library.sqlite")),
            PathBuf::from("/data/media_library.sqlite.lock")
        );
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite.lock");

        let held = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, MediaFlowError::RunInProgress(_)));

        drop(held);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_lock_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite.lock");
        let lock = RunLock::acquire(&path).unwrap();

        let on_disk = read_lock(&path).unwrap().unwrap();
        assert_eq!(&on_disk, lock.info());
        assert_eq!(on_disk.owner, worker_id());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite.lock");
        let old = LockInfo {
            owner: "crashed-host:1".to_string(),
            token: "old-token".to_string(),
            acquired_at: "2020-01-01T00:00:00Z".to_string(),
            heartbeat_at: "2020-01-01T00:00:00Z".to_string(),
        };
        fs::write(&path, serde_json::to_string(&old).unwrap()).unwrap();

        let lock = RunLock::acquire(&path).unwrap();
        assert_ne!(lock.info().token, "old-token");
    }

    #[test]
    fn test_reclaim_keeps_a_fresh_lock_from_a_competing_run() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite.lock");
        let stale = LockInfo {
            owner: "crashed-host:1".to_string(),
            token: "old-token".to_string(),
            acquired_at: "2020-01-01T00:00:00Z".to_string(),
            heartbeat_at: "2020-01-01T00:00:00Z".to_string(),
        };

        // The other run reclaimed first and now holds a fresh lock
        let fresh = RunLock::acquire(&path).unwrap();

        assert!(!reclaim_stale(&path, Some(&stale)).unwrap());
        assert_eq!(read_lock(&path).unwrap().unwrap().token, fresh.info().token);

        let leftovers: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_reclaim_removes_the_stale_lock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite.lock");
        let stale = LockInfo {
            owner: "crashed-host:1".to_string(),
            token: "old-token".to_string(),
            acquired_at: "2020-01-01T00:00:00Z".to_string(),
            heartbeat_at: "2020-01-01T00:00:00Z".to_string(),
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert!(reclaim_stale(&path, Some(&stale)).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_heartbeat_reports_missing_lock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite.lock");
        let mut lock = RunLock::acquire(&path).unwrap();

        fs::remove_file(&path).unwrap();
        assert!(matches!(lock.heartbeat(), Err(MediaFlowError::RunLockLost(_))));
    }

    #[test]
    fn test_heartbeat_detects_takeover() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.sqlite.lock");
        let mut lock = RunLock::acquire(&path).unwrap();
        lock.heartbeat().unwrap();

        // Another run reclaimed the lock underneath us
        let mut other = lock.info().clone();
        other.token = "someone-else".to_string();
        other.owner = "other:2".to_string();
        fs::write(&path, serde_json::to_string(&other).unwrap()).unwrap();

        assert!(matches!(lock.heartbeat(), Err(MediaFlowError::RunInProgress(_))));
        drop(lock);
        // The other run's lock survives our drop
        assert_eq!(read_lock(&path).unwrap().unwrap().token, "someone-else");
    }
}
