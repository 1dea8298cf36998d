//! Persistence for patches, attempts and the audit trail.
//!
//! The orchestrator only sees [`PatchStore`]; it never keeps its own map of
//! patch state. Two backends ship with the crate:
//!
//! - [`MemoryStore`] for tests and embedding
//! - [`SqliteStore`] for the CLI, at `.patchwarden/patches.db`

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::audit::AuditEntry;
use crate::models::{ExecutionAttempt, Patch, PatchFilter, PatchStatus};

pub trait PatchStore: Send + Sync {
    /// Insert or replace a patch.
    fn save_patch(&self, patch: &Patch) -> Result<()>;

    /// Set status and `updated_at`. Errors if the patch does not exist.
    fn update_patch_status(&self, id: &str, status: PatchStatus, at: DateTime<Utc>) -> Result<()>;

    fn get_patch(&self, id: &str) -> Result<Option<Patch>>;

    /// Matching patches, oldest first.
    fn list_patches(&self, filter: &PatchFilter) -> Result<Vec<Patch>>;

    /// Append-only.
    fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Entries in insertion order, optionally for one patch.
    fn audit_trail(&self, patch_id: Option<&str>) -> Result<Vec<AuditEntry>>;

    /// Insert or replace an attempt.
    fn save_attempt(&self, attempt: &ExecutionAttempt) -> Result<()>;

    /// Attempts for one patch, oldest first.
    fn list_attempts(&self, patch_id: &str) -> Result<Vec<ExecutionAttempt>>;

    /// Start times of attempts that began after `since`, for seeding the
    /// rate limiter.
    fn execution_times_since(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>>;
}
