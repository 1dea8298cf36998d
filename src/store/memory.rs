use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};

use super::PatchStore;
use crate::audit::AuditEntry;
use crate::models::{ExecutionAttempt, Patch, PatchFilter, PatchStatus};

#[derive(Default)]
struct Inner {
    // Vecs, not maps: listing order is insertion order.
    patches: Vec<Patch>,
    audit: Vec<AuditEntry>,
    attempts: Vec<ExecutionAttempt>,
}

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| anyhow!("Store lock poisoned: {}", e))
    }
}

impl PatchStore for MemoryStore {
    fn save_patch(&self, patch: &Patch) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.patches.iter_mut().find(|p| p.id == patch.id) {
            Some(existing) => *existing = patch.clone(),
            None => inner.patches.push(patch.clone()),
        }
        Ok(())
    }

    fn update_patch_status(&self, id: &str, status: PatchStatus, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock()?;
        let Some(patch) = inner.patches.iter_mut().find(|p| p.id == id) else {
            bail!("Patch {} not found", id);
        };
        patch.status = status;
        patch.updated_at = at;
        Ok(())
    }

    fn get_patch(&self, id: &str) -> Result<Option<Patch>> {
        Ok(self.lock()?.patches.iter().find(|p| p.id == id).cloned())
    }

    fn list_patches(&self, filter: &PatchFilter) -> Result<Vec<Patch>> {
        let inner = self.lock()?;
        let matching = inner.patches.iter().filter(|p| filter.matches(p)).cloned();
        Ok(match filter.limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.lock()?.audit.push(entry.clone());
        Ok(())
    }

    fn audit_trail(&self, patch_id: Option<&str>) -> Result<Vec<AuditEntry>> {
        Ok(self
            .lock()?
            .audit
            .iter()
            .filter(|e| patch_id.is_none_or(|id| e.patch_id == id))
            .cloned()
            .collect())
    }

    fn save_attempt(&self, attempt: &ExecutionAttempt) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.attempts.iter_mut().find(|a| a.id == attempt.id) {
            Some(existing) => *existing = attempt.clone(),
            None => inner.attempts.push(attempt.clone()),
        }
        Ok(())
    }

    fn list_attempts(&self, patch_id: &str) -> Result<Vec<ExecutionAttempt>> {
        Ok(self
            .lock()?
            .attempts
            .iter()
            .filter(|a| a.patch_id == patch_id)
            .cloned()
            .collect())
    }

    fn execution_times_since(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let mut times: Vec<DateTime<Utc>> = self
            .lock()?
            .attempts
            .iter()
            .map(|a| a.started_at)
            .filter(|t| *t > since)
            .collect();
        times.sort();
        Ok(times)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn test_patches_roundtrip() {
        contract::patches_roundtrip(&MemoryStore::new());
    }

    #[test]
    fn test_list_filters() {
        contract::list_filters(&MemoryStore::new());
    }

    #[test]
    fn test_audit_is_ordered() {
        contract::audit_is_ordered(&MemoryStore::new());
    }

    #[test]
    fn test_attempts_and_times() {
        contract::attempts_and_times(&MemoryStore::new());
    }
}
