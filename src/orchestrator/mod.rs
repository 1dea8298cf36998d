//! Patch orchestration.
//!
//! The [`Orchestrator`] owns the per-patch state machine. It is the only
//! component that calls the validator, the rate limiter, the backup manager
//! and the applier, and the only one that writes patch status.
//!
//! Every transition follows the same order: append the audit entry, write
//! the new status, then emit a [`PatchEvent`]. The audit trail therefore
//! never lags the patch table.
//!
//! Submodules:
//!
//! | Module    | Purpose                                           |
//! |-----------|---------------------------------------------------|
//! | `state`   | Transition table and verb preconditions           |
//! | `events`  | Broadcast of typed transition events              |
//! | `locks`   | Per-path async locks and the cross-process lock   |
//! | `runner`  | Snapshot → apply → restore for one attempt        |

pub mod events;
pub mod locks;
mod runner;
pub mod state;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::apply::PatchApplier;
use crate::audit::{AuditAction, AuditEntry, SYSTEM_ACTOR};
use crate::backup::BackupManager;
use crate::diff::{self, FileChange, total_stats};
use crate::errors::{BackupError, ParseError, PatchError};
use crate::models::{
    ExecutionAttempt, GeneratedDiff, IssueDescriptor, Patch, PatchFilter, PatchStatus,
};
use crate::ratelimit::{
    Admission, Clock, DEFAULT_MAX_PER_WINDOW, DEFAULT_WINDOW, RateLimiter, SystemClock,
};
use crate::store::PatchStore;
use crate::validate::{ValidationResult, Validator, ValidatorSettings};
pub use events::{EventBus, PatchEvent};
use locks::PathLocks;
use runner::{AttemptOutcome, AttemptRunner};
use state::{can_execute, can_reject, is_valid_transition};

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub work_dir: PathBuf,
    /// Relative paths resolve against `work_dir`.
    pub backup_dir: PathBuf,
    pub max_executions_per_hour: u32,
    pub window: Duration,
    pub attempt_timeout: Duration,
    /// Run validation as part of `submit`. When off, patches wait in
    /// `received` until an operator approves them.
    pub auto_validate: bool,
    /// Actor recorded for operator verbs.
    pub operator: String,
    pub validator: ValidatorSettings,
}

impl OrchestratorConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            backup_dir: PathBuf::from(".patchwarden/backups"),
            max_executions_per_hour: DEFAULT_MAX_PER_WINDOW,
            window: DEFAULT_WINDOW,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            auto_validate: true,
            operator: "operator".to_string(),
            validator: ValidatorSettings::default(),
        }
    }
}

/// Outcome of `Orchestrator::admit`.
enum Slot {
    Granted(ExecutionAttempt),
    Deferred(Duration),
}

pub struct Orchestrator {
    store: Arc<dyn PatchStore>,
    validator: Validator,
    runner: AttemptRunner,
    limiter: RateLimiter,
    /// Serializes admission so the store read and the attempt write that
    /// records it are not interleaved within this process.
    admission: Mutex<()>,
    path_locks: PathLocks,
    patch_locks: PathLocks,
    events: EventBus,
    operator: String,
    attempt_timeout: Duration,
    auto_validate: bool,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn PatchStore>) -> Result<Self, PatchError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Build with an explicit clock. The limiter is seeded from attempts
    /// already in the store, so the window survives restarts; it is seeded
    /// again at every admission so orchestrators sharing a store share the
    /// ceiling.
    pub fn with_clock(
        config: OrchestratorConfig,
        store: Arc<dyn PatchStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PatchError> {
        let limiter = RateLimiter::with_clock(config.max_executions_per_hour, config.window, clock);
        let history = store
            .execution_times_since(limiter.window_start())
            .map_err(PatchError::Store)?;
        limiter.seed(history);

        let events = EventBus::new();
        let runner = AttemptRunner {
            backups: BackupManager::new(&config.work_dir, &config.backup_dir),
            applier: PatchApplier::new(&config.work_dir),
            events: events.clone(),
        };

        Ok(Self {
            validator: Validator::new(&config.work_dir, config.validator),
            runner,
            limiter,
            admission: Mutex::new(()),
            path_locks: PathLocks::new(),
            patch_locks: PathLocks::new(),
            events,
            operator: config.operator,
            attempt_timeout: config.attempt_timeout,
            auto_validate: config.auto_validate,
            store,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PatchEvent> {
        self.events.subscribe()
    }

    pub fn backups(&self) -> &BackupManager {
        &self.runner.backups
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    // ── Intake ────────────────────────────────────────────────────────

    /// Record a generated diff for an issue and, unless disabled, validate it.
    ///
    /// The affected-file set is always recomputed from the diff; whatever
    /// the issue descriptor claims is only compared and logged.
    pub async fn submit(
        &self,
        issue: &IssueDescriptor,
        generated: GeneratedDiff,
    ) -> Result<Patch, PatchError> {
        if generated.issue_id != issue.id {
            return Err(PatchError::IssueMismatch {
                issue: issue.id.clone(),
                generated: generated.issue_id,
            });
        }

        let affected = diff::affected_files(&generated.patch_content);
        if let Some(claimed) = &issue.affected_files {
            let claimed: BTreeSet<&str> = claimed.iter().map(String::as_str).collect();
            let actual: BTreeSet<&str> = affected.iter().map(String::as_str).collect();
            if claimed != actual {
                warn!(
                    issue_id = %issue.id,
                    ?claimed,
                    ?actual,
                    "Issue descriptor disagrees with the diff about affected files; using the diff"
                );
            }
        }

        let parsed = diff::parse(&generated.patch_content);
        let confidence = match (generated.confidence, &parsed) {
            (Some(c), _) => c.min(100),
            (None, Ok(changes)) => estimate_confidence(changes),
            (None, Err(_)) => 0,
        };

        let now = Utc::now();
        let mut patch = Patch {
            id: uuid::Uuid::new_v4().to_string(),
            issue_id: issue.id.clone(),
            patch_content: generated.patch_content,
            affected_files: affected,
            status: PatchStatus::Received,
            confidence,
            validation_score: None,
            validation: None,
            rollback_failed: false,
            operator_override: false,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };

        let entry = AuditEntry::new(SYSTEM_ACTOR, AuditAction::Submitted, &patch.id)
            .transition(None, PatchStatus::Received)
            .with_details(json!({
                "issue_id": issue.id,
                "category": issue.category,
                "severity": issue.severity,
                "affected_files": patch.affected_files,
                "confidence": confidence,
            }));
        self.store.append_audit(&entry).map_err(PatchError::Store)?;
        self.store.save_patch(&patch).map_err(PatchError::Store)?;
        info!(patch_id = %patch.id, issue_id = %issue.id, files = patch.affected_files.len(), "Patch received");
        self.events.emit(PatchEvent::Transition {
            patch_id: patch.id.clone(),
            from: None,
            to: PatchStatus::Received,
            actor: SYSTEM_ACTOR.to_string(),
            at: now,
        });

        let changes = match non_empty(parsed) {
            Ok(changes) => changes,
            Err(err) => {
                warn!(patch_id = %patch.id, error = %err, "Diff unusable; rejecting");
                patch.rejection_reason = Some(err.to_string());
                self.store.save_patch(&patch).map_err(PatchError::Store)?;
                self.transition(
                    &mut patch,
                    PatchStatus::Rejected,
                    AuditAction::Rejected,
                    SYSTEM_ACTOR,
                    json!({ "reason": err.to_string() }),
                )?;
                return Err(PatchError::Parse {
                    patch_id: patch.id,
                    source: err,
                });
            }
        };

        if self.auto_validate {
            self.validate_patch(&mut patch, &changes, SYSTEM_ACTOR).await?;
        }
        Ok(patch)
    }

    // ── Operator verbs ────────────────────────────────────────────────

    /// Validate a received patch, or override a soft rejection.
    ///
    /// A rejected patch may be approved only when its stored validation
    /// recorded no errors, i.e. it fell short on heuristic warnings alone.
    pub async fn approve(&self, id: &str) -> Result<Patch, PatchError> {
        let _guard = self.patch_locks.acquire(&[id.to_string()]).await;
        let mut patch = self.load(id)?;

        match patch.status {
            PatchStatus::Received => {
                let changes = non_empty(diff::parse(&patch.patch_content)).map_err(|source| {
                    PatchError::Parse {
                        patch_id: id.to_string(),
                        source,
                    }
                })?;
                let actor = self.operator.clone();
                self.validate_patch(&mut patch, &changes, &actor).await?;
                Ok(patch)
            }
            PatchStatus::Rejected
                if patch
                    .validation
                    .as_ref()
                    .is_some_and(ValidationResult::is_soft_failure) =>
            {
                patch.operator_override = true;
                patch.rejection_reason = None;
                self.store.save_patch(&patch).map_err(PatchError::Store)?;
                let score = patch.validation_score;
                let actor = self.operator.clone();
                self.transition(
                    &mut patch,
                    PatchStatus::Approved,
                    AuditAction::Approved,
                    &actor,
                    json!({ "override": true, "score": score }),
                )?;
                Ok(patch)
            }
            from => Err(PatchError::InvalidTransition {
                id: id.to_string(),
                from,
                action: "approve",
            }),
        }
    }

    pub async fn reject(&self, id: &str, reason: &str) -> Result<Patch, PatchError> {
        let _guard = self.patch_locks.acquire(&[id.to_string()]).await;
        let mut patch = self.load(id)?;
        if !can_reject(patch.status) {
            return Err(PatchError::InvalidTransition {
                id: id.to_string(),
                from: patch.status,
                action: "reject",
            });
        }
        patch.rejection_reason = Some(reason.to_string());
        self.store.save_patch(&patch).map_err(PatchError::Store)?;
        let actor = self.operator.clone();
        self.transition(
            &mut patch,
            PatchStatus::Rejected,
            AuditAction::Rejected,
            &actor,
            json!({ "reason": reason }),
        )?;
        Ok(patch)
    }

    pub async fn execute(&self, id: &str) -> Result<ExecutionAttempt, PatchError> {
        self.execute_with_cancel(id, CancellationToken::new()).await
    }

    /// Execute an approved (or previously rolled back) patch.
    ///
    /// Returns the attempt on success. A failed attempt is always rolled
    /// back before this returns; the error carries the attempt so callers
    /// see what the rollback achieved.
    pub async fn execute_with_cancel(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionAttempt, PatchError> {
        let _guard = self.patch_locks.acquire(&[id.to_string()]).await;
        let mut patch = self.load(id)?;
        if !can_execute(patch.status) {
            return Err(PatchError::InvalidTransition {
                id: id.to_string(),
                from: patch.status,
                action: "execute",
            });
        }
        let changes = non_empty(diff::parse(&patch.patch_content)).map_err(|source| {
            PatchError::Parse {
                patch_id: id.to_string(),
                source,
            }
        })?;

        let mut attempt = match self.admit(id)? {
            Slot::Granted(attempt) => attempt,
            Slot::Deferred(retry_after) => {
                let retry_after_secs =
                    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let entry = AuditEntry::new(&self.operator, AuditAction::ExecutionDeferred, id)
                    .with_details(json!({
                        "retry_after_secs": retry_after_secs,
                        "max_per_window": self.limiter.max(),
                    }));
                let entry = AuditEntry {
                    from: Some(patch.status),
                    ..entry
                };
                self.store.append_audit(&entry).map_err(PatchError::Store)?;
                warn!(patch_id = id, retry_after_secs, "Execution deferred by rate limit");
                self.events.emit(PatchEvent::ExecutionDeferred {
                    patch_id: id.to_string(),
                    retry_after_secs,
                });
                return Err(PatchError::RateLimited {
                    patch_id: id.to_string(),
                    retry_after_secs,
                });
            }
        };

        let _paths = self.path_locks.acquire(&patch.affected_files).await;
        let deadline = tokio::time::Instant::now() + self.attempt_timeout;

        let actor = self.operator.clone();
        self.transition(
            &mut patch,
            PatchStatus::Executing,
            AuditAction::ExecutionStarted,
            &actor,
            json!({ "attempt_id": attempt.id }),
        )?;

        let outcome = self
            .runner
            .run(
                id,
                &attempt.id,
                Arc::new(changes),
                patch.affected_files.clone(),
                deadline,
                cancel,
            )
            .await;

        match outcome {
            AttemptOutcome::Applied { modified, .. } => {
                attempt.success = true;
                attempt.modified_files = modified;
                attempt.backup_location = Some(self.manifest_location(&attempt.id));
                attempt.finish();
                self.store.save_attempt(&attempt).map_err(PatchError::Store)?;
                self.transition(
                    &mut patch,
                    PatchStatus::Executed,
                    AuditAction::Executed,
                    SYSTEM_ACTOR,
                    json!({
                        "attempt_id": attempt.id,
                        "modified_files": attempt.modified_files,
                        "backup": attempt.backup_location,
                        "duration_ms": attempt.duration_ms,
                    }),
                )?;
                Ok(attempt)
            }
            AttemptOutcome::SnapshotFailed { error } => {
                attempt.error = Some(format!("backup failed: {}", error));
                attempt.finish();
                self.store.save_attempt(&attempt).map_err(PatchError::Store)?;
                self.transition(
                    &mut patch,
                    PatchStatus::Failed,
                    AuditAction::ExecutionFailed,
                    SYSTEM_ACTOR,
                    json!({ "attempt_id": attempt.id, "stage": "snapshot", "error": attempt.error }),
                )?;
                // Nothing was written, so there is nothing to restore.
                self.transition(
                    &mut patch,
                    PatchStatus::RolledBack,
                    AuditAction::RolledBack,
                    SYSTEM_ACTOR,
                    json!({ "attempt_id": attempt.id, "restored": 0 }),
                )?;
                Err(PatchError::ExecutionFailed {
                    patch_id: id.to_string(),
                    attempt: Box::new(attempt),
                })
            }
            AttemptOutcome::Reverted {
                error,
                modified,
                report,
                cancelled,
                timed_out,
                ..
            } => {
                attempt.error = Some(error);
                attempt.modified_files = modified;
                attempt.backup_location = Some(self.manifest_location(&attempt.id));
                attempt.rollback_triggered = true;
                attempt.restored_count = report.restored_count();
                attempt.rollback_failed = !report.is_complete();
                attempt.failed_paths = report.failed.clone();
                attempt.cancelled = cancelled;
                attempt.timed_out = timed_out;
                attempt.finish();
                self.store.save_attempt(&attempt).map_err(PatchError::Store)?;

                if report.is_complete() {
                    self.transition(
                        &mut patch,
                        PatchStatus::Failed,
                        AuditAction::ExecutionFailed,
                        SYSTEM_ACTOR,
                        json!({
                            "attempt_id": attempt.id,
                            "stage": "apply",
                            "error": attempt.error,
                            "modified_files": attempt.modified_files,
                            "cancelled": cancelled,
                            "timed_out": timed_out,
                        }),
                    )?;
                    self.transition(
                        &mut patch,
                        PatchStatus::RolledBack,
                        AuditAction::RolledBack,
                        SYSTEM_ACTOR,
                        json!({ "attempt_id": attempt.id, "restored": attempt.restored_count }),
                    )?;
                    Err(PatchError::ExecutionFailed {
                        patch_id: id.to_string(),
                        attempt: Box::new(attempt),
                    })
                } else {
                    patch.rollback_failed = true;
                    self.store.save_patch(&patch).map_err(PatchError::Store)?;
                    self.transition(
                        &mut patch,
                        PatchStatus::Failed,
                        AuditAction::RollbackFailed,
                        SYSTEM_ACTOR,
                        json!({
                            "attempt_id": attempt.id,
                            "error": attempt.error,
                            "restored": attempt.restored_count,
                            "failed_paths": attempt.failed_paths,
                            "backup": attempt.backup_location,
                        }),
                    )?;
                    self.emit_rollback_incomplete(id, &report.failed);
                    error!(
                        patch_id = id,
                        backup = ?attempt.backup_location,
                        "Execution failed AND rollback incomplete; manual recovery required"
                    );
                    Err(PatchError::Unrecoverable {
                        patch_id: id.to_string(),
                        attempt: Box::new(attempt),
                    })
                }
            }
        }
    }

    /// Undo an executed patch, or finish an automatic rollback that did not
    /// complete. Returns the number of paths restored.
    pub async fn rollback(&self, id: &str) -> Result<usize, PatchError> {
        let _guard = self.patch_locks.acquire(&[id.to_string()]).await;
        let mut patch = self.load(id)?;
        let allowed = match patch.status {
            PatchStatus::Executed => true,
            PatchStatus::Failed => patch.rollback_failed,
            _ => false,
        };
        if !allowed {
            return Err(PatchError::InvalidTransition {
                id: id.to_string(),
                from: patch.status,
                action: "rollback",
            });
        }

        let mut attempt = self
            .store
            .list_attempts(id)
            .map_err(PatchError::Store)?
            .into_iter()
            .rev()
            .find(|a| a.backup_location.is_some())
            .ok_or_else(|| {
                PatchError::Backup(BackupError::NotFound {
                    attempt_id: "<none>".to_string(),
                    path: self.runner.backups.backup_dir().to_path_buf(),
                })
            })?;
        let manifest = self.runner.backups.load(&attempt.id)?;

        let _paths = self.path_locks.acquire(&patch.affected_files).await;
        let report = self.runner.restore(&manifest).await;

        attempt.rollback_triggered = true;
        attempt.restored_count = report.restored_count();
        attempt.rollback_failed = !report.is_complete();
        attempt.failed_paths = report.failed.clone();
        self.store.save_attempt(&attempt).map_err(PatchError::Store)?;

        let actor = self.operator.clone();
        match report.clone().into_result() {
            Ok(restored) => {
                patch.rollback_failed = false;
                self.store.save_patch(&patch).map_err(PatchError::Store)?;
                self.transition(
                    &mut patch,
                    PatchStatus::RolledBack,
                    AuditAction::RolledBack,
                    &actor,
                    json!({ "attempt_id": attempt.id, "restored": restored }),
                )?;
                Ok(restored)
            }
            Err(err) => {
                let details = json!({
                    "attempt_id": attempt.id,
                    "restored": err.restored,
                    "failed_paths": err.failed,
                });
                if patch.status == PatchStatus::Executed {
                    patch.rollback_failed = true;
                    self.store.save_patch(&patch).map_err(PatchError::Store)?;
                    self.transition(
                        &mut patch,
                        PatchStatus::Failed,
                        AuditAction::RollbackFailed,
                        &actor,
                        details,
                    )?;
                } else {
                    let entry = AuditEntry::new(&actor, AuditAction::RollbackFailed, id).with_details(details);
                    let entry = AuditEntry {
                        from: Some(patch.status),
                        ..entry
                    };
                    self.store.append_audit(&entry).map_err(PatchError::Store)?;
                }
                self.emit_rollback_incomplete(id, &err.failed);
                error!(patch_id = id, failed = err.failed.len(), "Rollback incomplete");
                Err(PatchError::Rollback {
                    patch_id: id.to_string(),
                    source: err,
                })
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Patch, PatchError> {
        self.load(id)
    }

    pub fn list(&self, filter: &PatchFilter) -> Result<Vec<Patch>, PatchError> {
        self.store.list_patches(filter).map_err(PatchError::Store)
    }

    pub fn attempts(&self, id: &str) -> Result<Vec<ExecutionAttempt>, PatchError> {
        self.store.list_attempts(id).map_err(PatchError::Store)
    }

    pub fn audit_trail(&self, id: Option<&str>) -> Result<Vec<AuditEntry>, PatchError> {
        self.store.audit_trail(id).map_err(PatchError::Store)
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn load(&self, id: &str) -> Result<Patch, PatchError> {
        self.store
            .get_patch(id)
            .map_err(PatchError::Store)?
            .ok_or_else(|| PatchError::NotFound { id: id.to_string() })
    }

    fn manifest_location(&self, attempt_id: &str) -> String {
        self.runner
            .backups
            .manifest_path(attempt_id)
            .display()
            .to_string()
    }

    async fn validate_patch(
        &self,
        patch: &mut Patch,
        changes: &[FileChange],
        actor: &str,
    ) -> Result<(), PatchError> {
        self.transition(
            patch,
            PatchStatus::Validating,
            AuditAction::ValidationStarted,
            actor,
            serde_json::Value::Null,
        )?;

        let result = self.validator.validate(changes, &patch.affected_files).await;
        patch.validation_score = Some(result.score);
        patch.validation = Some(result.clone());

        if result.passed {
            self.store.save_patch(patch).map_err(PatchError::Store)?;
            self.transition(
                patch,
                PatchStatus::Approved,
                AuditAction::Approved,
                actor,
                json!({ "score": result.score, "warnings": result.warnings.len() }),
            )?;
            Ok(())
        } else {
            patch.rejection_reason = Some(format!(
                "validation failed with score {} (minimum {})",
                result.score, result.min_score
            ));
            self.store.save_patch(patch).map_err(PatchError::Store)?;
            self.transition(
                patch,
                PatchStatus::Rejected,
                AuditAction::Rejected,
                actor,
                json!({
                    "score": result.score,
                    "errors": result.errors,
                    "warnings": result.warnings,
                }),
            )?;
            Err(PatchError::ValidationFailed {
                patch_id: patch.id.clone(),
                result: Box::new(result),
            })
        }
    }

    /// Ask the limiter for a slot against the store's view of the window and,
    /// if admitted, persist the attempt that counts against it.
    fn admit(&self, id: &str) -> Result<Slot, PatchError> {
        let _admission = self.admission.lock().unwrap_or_else(|e| e.into_inner());
        let history = self
            .store
            .execution_times_since(self.limiter.window_start())
            .map_err(PatchError::Store)?;
        self.limiter.seed(history);

        match self.limiter.try_acquire() {
            Admission::Admitted => {
                let mut attempt = ExecutionAttempt::start(id);
                attempt.started_at = self.limiter.now();
                self.store.save_attempt(&attempt).map_err(PatchError::Store)?;
                Ok(Slot::Granted(attempt))
            }
            Admission::Denied { retry_after } => Ok(Slot::Deferred(retry_after)),
        }
    }

    /// Audit, persist, then announce one status change.
    fn transition(
        &self,
        patch: &mut Patch,
        to: PatchStatus,
        action: AuditAction,
        actor: &str,
        details: serde_json::Value,
    ) -> Result<(), PatchError> {
        let from = patch.status;
        if !is_valid_transition(from, to) {
            return Err(PatchError::InvalidTransition {
                id: patch.id.clone(),
                from,
                action: action.as_str(),
            });
        }

        let entry = AuditEntry::new(actor, action, &patch.id)
            .transition(Some(from), to)
            .with_details(details);
        self.store.append_audit(&entry).map_err(PatchError::Store)?;
        self.store
            .update_patch_status(&patch.id, to, entry.at)
            .map_err(PatchError::Store)?;
        patch.status = to;
        patch.updated_at = entry.at;

        info!(patch_id = %patch.id, %from, %to, actor, "Patch transition");
        self.events.emit(PatchEvent::Transition {
            patch_id: patch.id.clone(),
            from: Some(from),
            to,
            actor: actor.to_string(),
            at: entry.at,
        });
        Ok(())
    }

    fn emit_rollback_incomplete(&self, id: &str, failed: &[(String, String)]) {
        self.events.emit(PatchEvent::RollbackIncomplete {
            patch_id: id.to_string(),
            failed_paths: failed.iter().map(|(p, _)| p.clone()).collect(),
        });
    }
}

fn non_empty(parsed: Result<Vec<FileChange>, ParseError>) -> Result<Vec<FileChange>, ParseError> {
    match parsed {
        Ok(changes) if changes.is_empty() => Err(ParseError::NoFileSections),
        other => other,
    }
}

/// Confidence when the generator supplies none.
///
/// Starts at 90 and loses 5 per extra file, 5 per 25 changed lines and 10
/// if the patch deletes a file; clamped to 10..=95. Small, single-file,
/// additive patches score highest.
pub fn estimate_confidence(changes: &[FileChange]) -> u8 {
    if changes.is_empty() {
        return 0;
    }
    let (added, removed) = total_stats(changes);
    let extra_files = changes.len().saturating_sub(1) as i64;
    let size_steps = ((added + removed) / 25) as i64;
    let deletes = changes
        .iter()
        .any(|c| matches!(c, FileChange::Delete { .. }));

    let score = 90 - 5 * extra_files - 5 * size_steps - if deletes { 10 } else { 0 };
    score.clamp(10, 95) as u8
}
