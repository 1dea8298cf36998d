//! Typed error hierarchy for patchwarden.
//!
//! One enum per subsystem:
//! - `ParseError`: the diff text itself is unusable
//! - `ApplyError` / `PartialApply`: mutation of the working tree failed
//! - `BackupError`: snapshot or manifest persistence failed
//! - `RollbackError`: a restore left some paths unrestored
//! - `PatchError`: orchestrator-level outcomes surfaced to callers

use std::path::PathBuf;

use thiserror::Error;

use crate::models::{ExecutionAttempt, PatchStatus};
use crate::validate::ValidationResult;

/// The diff is structurally unusable; the patch never reaches validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("diff contains no parseable file sections")]
    NoFileSections,

    #[error("unsafe path '{path}' in diff header: {reason}")]
    UnsafePath { path: String, reason: &'static str },
}

/// A single change could not be applied.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("refusing to overwrite existing file {path} with different content")]
    WouldOverwrite { path: String },

    #[error("{path}: file to modify does not exist")]
    MissingFile { path: String },

    #[error("{path}: hunk {hunk} starts at line {old_start} but the file has {file_lines} lines")]
    HunkOutOfRange {
        path: String,
        hunk: usize,
        old_start: usize,
        file_lines: usize,
    },

    #[error("{path}: hunk {hunk} starts at line {old_start}, inside the previous hunk")]
    HunkOverlap {
        path: String,
        hunk: usize,
        old_start: usize,
    },

    #[error("{path}: hunk {hunk} expected {expected:?} at line {line}, found {found:?}")]
    ContextMismatch {
        path: String,
        hunk: usize,
        line: usize,
        expected: String,
        found: String,
    },

    #[error(
        "{path}: hunk {hunk} declares -{declared_old} +{declared_new} lines but contains -{actual_old} +{actual_new}"
    )]
    CountMismatch {
        path: String,
        hunk: usize,
        declared_old: usize,
        declared_new: usize,
        actual_old: usize,
        actual_new: usize,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("post-apply verification failed for {path}: {reason}")]
    Verification { path: String, reason: String },

    #[error("apply cancelled before {path}")]
    Cancelled { path: String },
}

/// An apply run that stopped part-way, with the paths it had already written.
#[derive(Debug, Error)]
#[error("{error} (after modifying {} file(s))", .modified.len())]
pub struct PartialApply {
    pub modified: Vec<String>,
    #[source]
    pub error: ApplyError,
}

/// Snapshot capture or manifest persistence failed.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to read {path} for backup: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8 and cannot be captured")]
    NotUtf8 { path: String },

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode manifest: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("manifest for attempt {attempt_id} not found at {path}")]
    NotFound { attempt_id: String, path: PathBuf },

    #[error("manifest {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A restore that could not put every recorded path back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("restored {restored} path(s) but {} failed: {}", .failed.len(), describe_failures(.failed))]
pub struct RollbackError {
    pub restored: usize,
    pub failed: Vec<(String, String)>,
}

fn describe_failures(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(path, reason)| format!("{} ({})", path, reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Patch {id} not found")]
    NotFound { id: String },

    #[error("Patch {id} cannot {action} from status '{from}'")]
    InvalidTransition {
        id: String,
        from: PatchStatus,
        action: &'static str,
    },

    #[error("Issue id mismatch: descriptor '{issue}' but diff was generated for '{generated}'")]
    IssueMismatch { issue: String, generated: String },

    #[error("Patch {patch_id} rejected: {source}")]
    Parse {
        patch_id: String,
        #[source]
        source: ParseError,
    },

    #[error("Patch {patch_id} failed validation with score {}", .result.score)]
    ValidationFailed {
        patch_id: String,
        result: Box<ValidationResult>,
    },

    #[error("Patch {patch_id} deferred: execution rate limit reached, retry in {retry_after_secs}s")]
    RateLimited {
        patch_id: String,
        retry_after_secs: u64,
    },

    #[error("Patch {patch_id} failed and was rolled back: {}", .attempt.error.as_deref().unwrap_or("unknown error"))]
    ExecutionFailed {
        patch_id: String,
        attempt: Box<ExecutionAttempt>,
    },

    #[error("Patch {patch_id} failed AND rollback did not complete; manual recovery required from {}", .attempt.backup_location.as_deref().unwrap_or("<no backup>"))]
    Unrecoverable {
        patch_id: String,
        attempt: Box<ExecutionAttempt>,
    },

    #[error("Rollback of patch {patch_id} incomplete: {source}")]
    Rollback {
        patch_id: String,
        #[source]
        source: RollbackError,
    },

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_unsafe_path_mentions_path() {
        let err = ParseError::UnsafePath {
            path: "../etc/passwd".into(),
            reason: "parent directory traversal",
        };
        assert!(err.to_string().contains("../etc/passwd"));
    }

    #[test]
    fn partial_apply_reports_modified_count() {
        let err = PartialApply {
            modified: vec!["a.ts".into(), "b.ts".into()],
            error: ApplyError::MissingFile {
                path: "c.ts".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("c.ts"));
        assert!(msg.contains("2 file(s)"));
    }

    #[test]
    fn rollback_error_lists_failed_paths() {
        let err = RollbackError {
            restored: 1,
            failed: vec![("src/a.ts".into(), "permission denied".into())],
        };
        let msg = err.to_string();
        assert!(msg.contains("restored 1"));
        assert!(msg.contains("src/a.ts (permission denied)"));
    }

    #[test]
    fn invalid_transition_is_matchable() {
        let err = PatchError::InvalidTransition {
            id: "p1".into(),
            from: PatchStatus::Executed,
            action: "approve",
        };
        match &err {
            PatchError::InvalidTransition { from, action, .. } => {
                assert_eq!(*from, PatchStatus::Executed);
                assert_eq!(*action, "approve");
            }
            _ => panic!("Expected InvalidTransition"),
        }
        assert!(err.to_string().contains("executed"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ParseError::NoFileSections);
        assert_std_error(&ApplyError::WouldOverwrite { path: "x".into() });
        assert_std_error(&BackupError::NotUtf8 { path: "x".into() });
        assert_std_error(&RollbackError {
            restored: 0,
            failed: vec![],
        });
        assert_std_error(&PatchError::NotFound { id: "x".into() });
    }
}
