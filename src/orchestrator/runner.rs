//! One execution attempt: snapshot, apply, and restore on failure.
//!
//! File work is blocking and runs under `spawn_blocking`. The apply step is
//! bounded by the attempt's deadline; when the deadline passes or the caller
//! cancels, the applier is told to stop at the next file boundary, the
//! blocking task is awaited to completion, and the snapshot is restored.
//! An attempt never returns while its files are half-way.

use std::sync::Arc;

use tokio::task::JoinError;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::events::{EventBus, PatchEvent};
use crate::apply::PatchApplier;
use crate::backup::{BackupManager, BackupManifest, RestoreReport};
use crate::diff::FileChange;
use crate::errors::PartialApply;

/// How an attempt ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Applied {
        modified: Vec<String>,
        manifest: BackupManifest,
    },
    /// Nothing was mutated.
    SnapshotFailed { error: String },
    /// Mutation started and was undone (fully or not).
    Reverted {
        error: String,
        modified: Vec<String>,
        manifest: BackupManifest,
        report: RestoreReport,
        cancelled: bool,
        timed_out: bool,
    },
}

pub(crate) struct AttemptRunner {
    pub backups: BackupManager,
    pub applier: PatchApplier,
    pub events: EventBus,
}

impl AttemptRunner {
    pub async fn run(
        &self,
        patch_id: &str,
        attempt_id: &str,
        changes: Arc<Vec<FileChange>>,
        paths: Vec<String>,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        let manifest = match self.snapshot(patch_id, attempt_id, paths).await {
            Ok(manifest) => manifest,
            Err(error) => {
                warn!(patch_id, attempt_id, %error, "Snapshot failed; nothing was modified");
                return AttemptOutcome::SnapshotFailed { error };
            }
        };
        self.events.emit(PatchEvent::BackupCaptured {
            patch_id: patch_id.to_string(),
            attempt_id: attempt_id.to_string(),
            files: manifest.len(),
            location: self.backups.manifest_path(attempt_id).display().to_string(),
        });

        let stop = cancel.child_token();
        let expired = Instant::now() >= deadline;
        if expired {
            stop.cancel();
        }
        let applier = self.applier.clone();
        let apply_changes = Arc::clone(&changes);
        let apply_stop = stop.clone();
        let mut handle = tokio::task::spawn_blocking(move || {
            applier.apply_with_cancel(&apply_changes, &apply_stop)
        });

        let (result, timed_out) = match timeout_at(deadline, &mut handle).await {
            Ok(joined) => (joined, expired),
            Err(_) => {
                warn!(patch_id, attempt_id, "Attempt exceeded its time budget; stopping apply");
                stop.cancel();
                (handle.await, true)
            }
        };

        let failure = match (result, timed_out) {
            (Ok(Ok(modified)), false) => {
                info!(patch_id, attempt_id, files = modified.len(), "Attempt applied");
                return AttemptOutcome::Applied { modified, manifest };
            }
            (Ok(Ok(modified)), true) => ApplyFailure {
                error: "attempt exceeded its time budget".to_string(),
                modified,
            },
            (Ok(Err(PartialApply { modified, error })), _) => ApplyFailure {
                error: error.to_string(),
                modified,
            },
            (Err(join), _) => ApplyFailure::from_join(join),
        };

        let cancelled = cancel.is_cancelled();
        let report = self.restore(&manifest).await;
        if report.is_complete() {
            info!(patch_id, attempt_id, restored = report.restored_count(), "Attempt rolled back");
        } else {
            error!(
                patch_id,
                attempt_id,
                failed = ?report.failed,
                "Rollback incomplete; manual recovery required"
            );
        }

        AttemptOutcome::Reverted {
            error: if timed_out && !failure.error.contains("time budget") {
                format!("attempt exceeded its time budget ({})", failure.error)
            } else {
                failure.error
            },
            modified: failure.modified,
            manifest,
            report,
            cancelled,
            timed_out,
        }
    }

    async fn snapshot(
        &self,
        patch_id: &str,
        attempt_id: &str,
        paths: Vec<String>,
    ) -> Result<BackupManifest, String> {
        let backups = self.backups.clone();
        let patch_id = patch_id.to_string();
        let attempt_id = attempt_id.to_string();
        tokio::task::spawn_blocking(move || backups.snapshot(&attempt_id, &patch_id, &paths))
            .await
            .map_err(|e| format!("snapshot task failed: {}", e))?
            .map_err(|e| e.to_string())
    }

    /// Restore `manifest`. Runs to completion regardless of cancellation.
    pub async fn restore(&self, manifest: &BackupManifest) -> RestoreReport {
        let backups = self.backups.clone();
        let owned = manifest.clone();
        match tokio::task::spawn_blocking(move || backups.restore(&owned)).await {
            Ok(report) => report,
            Err(join) => RestoreReport {
                failed: manifest
                    .entries
                    .iter()
                    .map(|e| e.path.clone())
                    .chain(manifest.absent.iter().cloned())
                    .map(|p| (p, format!("restore task failed: {}", join)))
                    .collect(),
                ..Default::default()
            },
        }
    }
}

struct ApplyFailure {
    error: String,
    modified: Vec<String>,
}

impl ApplyFailure {
    fn from_join(join: JoinError) -> Self {
        Self {
            error: format!("apply task failed: {}", join),
            modified: Vec::new(),
        }
    }
}
