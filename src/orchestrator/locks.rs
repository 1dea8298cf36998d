//! Mutual exclusion for mutating file work.
//!
//! [`PathLocks`] serializes executions inside one process: every path an
//! attempt touches is locked, in sorted order, from snapshot through
//! restore. [`ProcessLock`] is an advisory file lock for separate CLI
//! invocations sharing a project.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use fs2::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

const PROCESS_LOCK_RETRY_MS: u64 = 100;

#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Held locks; released on drop. Map entries nobody else is waiting on
/// are removed at the same time, so the map only holds live paths.
#[derive(Debug)]
pub struct PathGuards {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
    guards: Vec<(PathBuf, OwnedMutexGuard<()>)>,
}

impl Drop for PathGuards {
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain(..) {
            drop(guard);
            // The map's own Arc is the only one left when no task holds or awaits it.
            self.locks.remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every path. Sorted acquisition keeps two overlapping attempts
    /// from deadlocking on each other.
    pub async fn acquire(&self, paths: &[String]) -> PathGuards {
        let mut sorted: Vec<&String> = paths.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for path in sorted {
            let key = PathBuf::from(path);
            let mutex = self.locks.entry(key.clone()).or_default().clone();
            guards.push((key, mutex.lock_owned().await));
        }
        debug!(paths = guards.len(), "Path locks acquired");
        PathGuards {
            locks: Arc::clone(&self.locks),
            guards,
        }
    }

    /// Number of paths with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    /// Whether `path` is locked right now.
    pub fn is_locked(&self, path: &str) -> bool {
        self.locks
            .get(Path::new(path))
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Exclusive advisory lock on a file, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
}

impl ProcessLock {
    /// Wait up to `wait` for the lock.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // Lock file content doesn't matter, just the lock
            .open(path)?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= wait {
                        return Err(anyhow!(
                            "Timed out waiting for {} ({}s); another patchwarden process is executing",
                            path.display(),
                            wait.as_secs()
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(PROCESS_LOCK_RETRY_MS));
                }
            }
        }
        Ok(Self { file })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
