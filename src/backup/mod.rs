//! Pre-mutation backups.
//!
//! Before an attempt touches the working tree, [`BackupManager::snapshot`]
//! captures the full original text of every affected path and writes a
//! manifest to `<backup_dir>/<attempt_id>/manifest.json`. The manifest is
//! fsynced and renamed into place before `snapshot` returns, so no file is
//! ever mutated without a durable record of what it looked like.
//!
//! Paths that did not exist are recorded as `absent`; restoring removes them.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{BackupError, RollbackError};
use crate::util::{atomic_write, sha256_hex};

const MANIFEST_FILE: &str = "manifest.json";

/// Original content of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: String,
    pub content: String,
    pub sha256: String,
    pub captured_at: DateTime<Utc>,
}

/// Everything needed to put an attempt's files back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub attempt_id: String,
    pub patch_id: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<BackupEntry>,
    /// Paths that did not exist when the snapshot was taken.
    #[serde(default)]
    pub absent: Vec<String>,
}

impl BackupManifest {
    /// Number of paths the manifest covers.
    pub fn len(&self) -> usize {
        self.entries.len() + self.absent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.absent.is_empty()
    }

    pub fn covers(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path) || self.absent.iter().any(|p| p == path)
    }
}

/// Outcome of a restore. Partial success is explicit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RestoreReport {
    pub fn restored_count(&self) -> usize {
        self.restored.len() + self.removed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_result(self) -> Result<usize, RollbackError> {
        if self.failed.is_empty() {
            Ok(self.restored_count())
        } else {
            Err(RollbackError {
                restored: self.restored_count(),
                failed: self.failed,
            })
        }
    }
}

/// Short listing entry for `list()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub attempt_id: String,
    pub patch_id: String,
    pub created_at: DateTime<Utc>,
    pub files: usize,
    pub location: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    work_dir: PathBuf,
    backup_dir: PathBuf,
}

impl BackupManager {
    /// `backup_dir` is resolved against `work_dir` when relative.
    pub fn new(work_dir: impl AsRef<Path>, backup_dir: impl AsRef<Path>) -> Self {
        let work_dir = work_dir.as_ref().to_path_buf();
        let backup_dir = if backup_dir.as_ref().is_absolute() {
            backup_dir.as_ref().to_path_buf()
        } else {
            work_dir.join(backup_dir)
        };
        Self {
            work_dir,
            backup_dir,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn manifest_path(&self, attempt_id: &str) -> PathBuf {
        self.backup_dir.join(attempt_id).join(MANIFEST_FILE)
    }

    /// Capture every path and durably persist the manifest.
    pub fn snapshot(
        &self,
        attempt_id: &str,
        patch_id: &str,
        paths: &[String],
    ) -> Result<BackupManifest, BackupError> {
        let mut entries = Vec::new();
        let mut absent = Vec::new();

        for path in paths {
            let full = self.work_dir.join(path);
            match fs::read(&full) {
                Ok(bytes) => {
                    let sha256 = sha256_hex(&bytes);
                    let content = String::from_utf8(bytes)
                        .map_err(|_| BackupError::NotUtf8 { path: path.clone() })?;
                    entries.push(BackupEntry {
                        path: path.clone(),
                        content,
                        sha256,
                        captured_at: Utc::now(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path, "Path absent at snapshot time");
                    absent.push(path.clone());
                }
                Err(source) => return Err(BackupError::Read { path: full, source }),
            }
        }

        let manifest = BackupManifest {
            attempt_id: attempt_id.to_string(),
            patch_id: patch_id.to_string(),
            created_at: Utc::now(),
            entries,
            absent,
        };

        let location = self.manifest_path(attempt_id);
        let json = serde_json::to_vec_pretty(&manifest).map_err(BackupError::Encode)?;
        atomic_write(&location, &json).map_err(|source| BackupError::Write {
            path: location.clone(),
            source,
        })?;

        info!(
            attempt_id,
            patch_id,
            captured = manifest.entries.len(),
            absent = manifest.absent.len(),
            location = %location.display(),
            "Backup manifest written"
        );
        Ok(manifest)
    }

    /// Put every recorded path back. Keeps going past individual failures.
    ///
    /// Safe to call any number of times: restoring an already-restored tree
    /// rewrites identical bytes.
    pub fn restore(&self, manifest: &BackupManifest) -> RestoreReport {
        let mut report = RestoreReport::default();

        for entry in &manifest.entries {
            if sha256_hex(entry.content.as_bytes()) != entry.sha256 {
                report
                    .failed
                    .push((entry.path.clone(), "backup content fails digest check".into()));
                continue;
            }
            let full = self.work_dir.join(&entry.path);
            match restore_entry(&full, entry) {
                Ok(()) => report.restored.push(entry.path.clone()),
                Err(reason) => {
                    warn!(path = %entry.path, %reason, "Failed to restore path");
                    report.failed.push((entry.path.clone(), reason));
                }
            }
        }

        for path in &manifest.absent {
            let full = self.work_dir.join(path);
            match fs::remove_file(&full) {
                Ok(()) => report.removed.push(path.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => report.removed.push(path.clone()),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to remove path created by attempt");
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        info!(
            attempt_id = %manifest.attempt_id,
            restored = report.restored.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Restore finished"
        );
        report
    }

    pub fn load(&self, attempt_id: &str) -> Result<BackupManifest, BackupError> {
        let path = self.manifest_path(attempt_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BackupError::NotFound {
                    attempt_id: attempt_id.to_string(),
                    path,
                });
            }
            Err(source) => return Err(BackupError::Read { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| BackupError::Corrupt { path, source })
    }

    /// All readable manifests, oldest first. Unreadable ones are skipped.
    pub fn list(&self) -> Result<Vec<BackupSummary>, BackupError> {
        let dir = match fs::read_dir(&self.backup_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BackupError::Read {
                    path: self.backup_dir.clone(),
                    source,
                });
            }
        };

        let mut summaries = Vec::new();
        for entry in dir.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let attempt_id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&attempt_id) {
                Ok(manifest) => summaries.push(BackupSummary {
                    files: manifest.len(),
                    location: self.manifest_path(&attempt_id),
                    attempt_id,
                    patch_id: manifest.patch_id,
                    created_at: manifest.created_at,
                }),
                Err(e) => warn!(attempt_id = %attempt_id, error = %e, "Skipping unreadable manifest"),
            }
        }
        summaries.sort_by_key(|s| s.created_at);
        Ok(summaries)
    }
}

fn restore_entry(full: &Path, entry: &BackupEntry) -> Result<(), String> {
    if let Ok(current) = fs::read(full)
        && current == entry.content.as_bytes()
    {
        return Ok(());
    }
    atomic_write(full, entry.content.as_bytes()).map_err(|e| e.to_string())?;
    let written = fs::read(full).map_err(|e| e.to_string())?;
    if sha256_hex(&written) != entry.sha256 {
        return Err("restored bytes do not match recorded digest".into());
    }
    Ok(())
}
