//! Single-instance run lock.
//!
//! A run holds an exclusive lock file for its whole duration. The file is
//! created with `create_new`, so of two racing processes exactly one wins.
//! Each holder writes a unique token into the file and keeps its mtime
//! fresh through [`LockToken::refresh`] while it runs. A lock file whose
//! mtime is older than the configured staleness limit is assumed to be left
//! behind by a killed process and is removed before retrying once.
//!
//! On drop the file is deleted only if it still carries the holder's token,
//! so a holder whose lock was reclaimed never removes its successor's.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// A held run lock. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    token: LockToken,
}

/// Identifies one holder of a lock file. Cheap to clone into a heartbeat
/// task.
#[derive(Debug, Clone)]
pub struct LockToken {
    path: PathBuf,
    token: String,
}

impl RunLock {
    /// Try to take the lock at `path`.
    ///
    /// Returns `Ok(None)` when another live run holds it.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Option<RunLock>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create lock directory: {}", parent.display())
                })?;
            }
        }

        match try_create(path)? {
            Some(lock) => Ok(Some(lock)),
            None if is_stale(path, stale_after) => {
                warn!(path = %path.display(), "Removing stale run lock");
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("Failed to remove stale lock: {}", path.display())
                        })
                    }
                }
                try_create(path)
            }
            None => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.token.path
    }

    pub fn token(&self) -> LockToken {
        self.token.clone()
    }
}

impl LockToken {
    /// Whether the lock file still belongs to this holder.
    pub fn is_held(&self) -> bool {
        std::fs::read_to_string(&self.path)
            .map(|content| {
                content
                    .split_whitespace()
                    .any(|field| field.strip_prefix("token=") == Some(self.token.as_str()))
            })
            .unwrap_or(false)
    }

    /// Move the lock file's mtime to now. Returns `false` without touching
    /// the file when another run has taken the lock over.
    pub fn refresh(&self) -> Result<bool> {
        if !self.is_held() {
            return Ok(false);
        }
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_modified(SystemTime::now()))
            .with_context(|| format!("Failed to refresh lock file: {}", self.path.display()))?;
        Ok(true)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.token.is_held() {
            if self.token.path.exists() {
                warn!(path = %self.token.path.display(), "Run lock was taken over; leaving it in place");
            }
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.token.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.token.path.display(), error = %e, "Failed to release run lock");
            }
        }
    }
}

fn try_create(path: &Path) -> Result<Option<RunLock>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            let token = uuid::Uuid::new_v4().to_string();
            writeln!(
                file,
                "pid={} token={} started={}",
                std::process::id(),
                token,
                chrono::Utc::now().to_rfc3339()
            )?;
            info!(path = %path.display(), "Acquired run lock");
            Ok(Some(RunLock {
                token: LockToken {
                    path: path.to_path_buf(),
                    token,
                },
            }))
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to create lock file: {}", path.display()))
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HALF_HOUR: Duration = Duration::from_secs(1800);

    fn backdate(path: &Path, by: Duration) {
        OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[test]
    fn second_acquire_is_refused_until_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.lock");
        let first = RunLock::acquire(&path, HALF_HOUR).unwrap();
        assert!(first.is_some());
        assert!(RunLock::acquire(&path, HALF_HOUR).unwrap().is_none());
        drop(first);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path, HALF_HOUR).unwrap().is_some());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.lock");
        std::fs::write(&path, "pid=1").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let lock = RunLock::acquire(&path, Duration::from_millis(1)).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn reclaimed_lock_survives_previous_holders_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.lock");
        let first = RunLock::acquire(&path, HALF_HOUR).unwrap().unwrap();
        backdate(&path, Duration::from_secs(3600));

        let second = RunLock::acquire(&path, HALF_HOUR).unwrap().unwrap();
        assert!(!first.token().is_held());
        assert!(!first.token().refresh().unwrap());

        drop(first);
        assert!(path.exists());
        assert!(second.token().is_held());
        assert!(RunLock::acquire(&path, HALF_HOUR).unwrap().is_none());

        drop(second);
        assert!(!path.exists());
    }

    #[test]
    fn refreshed_lock_is_not_stale() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.lock");
        let lock = RunLock::acquire(&path, HALF_HOUR).unwrap().unwrap();
        backdate(&path, Duration::from_secs(3600));
        assert!(is_stale(&path, HALF_HOUR));

        assert!(lock.token().refresh().unwrap());
        assert!(!is_stale(&path, HALF_HOUR));
        assert!(RunLock::acquire(&path, HALF_HOUR).unwrap().is_none());
    }
}
