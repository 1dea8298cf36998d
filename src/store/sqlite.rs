use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::PatchStore;
use crate::audit::AuditEntry;
use crate::models::{ExecutionAttempt, Patch, PatchFilter, PatchStatus};

/// SQLite-backed store.
///
/// Each entity is kept as a JSON payload next to the few columns queries
/// need. Audit rows are protected by triggers that abort any UPDATE or
/// DELETE.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        run_migrations(&conn).context("Failed to run migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS patches (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            issue_id TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            patch_id TEXT NOT NULL,
            action TEXT NOT NULL,
            at TEXT NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attempts (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            patch_id TEXT NOT NULL,
            started_ms INTEGER NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_patches_status ON patches(status);
        CREATE INDEX IF NOT EXISTS idx_patches_issue ON patches(issue_id);
        CREATE INDEX IF NOT EXISTS idx_audit_patch ON audit_log(patch_id);
        CREATE INDEX IF NOT EXISTS idx_attempts_patch ON attempts(patch_id);
        CREATE INDEX IF NOT EXISTS idx_attempts_started ON attempts(started_ms);

        CREATE TRIGGER IF NOT EXISTS audit_log_no_update
        BEFORE UPDATE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
        BEFORE DELETE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only');
        END;
        ",
    )?;
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(payload: &str, what: &str) -> Result<T> {
    serde_json::from_str(payload).with_context(|| format!("Corrupt {} payload", what))
}

impl PatchStore for SqliteStore {
    fn save_patch(&self, patch: &Patch) -> Result<()> {
        let payload = serde_json::to_string(patch).context("Failed to encode patch")?;
        self.conn()?
            .execute(
                "INSERT INTO patches (id, issue_id, status, updated_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    issue_id = excluded.issue_id,
                    status = excluded.status,
                    updated_at = excluded.updated_at,
                    payload = excluded.payload",
                params![
                    patch.id,
                    patch.issue_id,
                    patch.status.as_str(),
                    patch.updated_at.to_rfc3339(),
                    payload
                ],
            )
            .context("Failed to upsert patch")?;
        Ok(())
    }

    fn update_patch_status(&self, id: &str, status: PatchStatus, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let payload: Option<String> = tx
            .query_row(
                "SELECT payload FROM patches WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query patch")?;
        let Some(payload) = payload else {
            bail!("Patch {} not found", id);
        };
        let mut patch: Patch = decode(&payload, "patch")?;
        patch.status = status;
        patch.updated_at = at;
        let payload = serde_json::to_string(&patch).context("Failed to encode patch")?;
        tx.execute(
            "UPDATE patches SET status = ?1, updated_at = ?2, payload = ?3 WHERE id = ?4",
            params![status.as_str(), at.to_rfc3339(), payload, id],
        )
        .context("Failed to update patch status")?;
        tx.commit().context("Failed to commit status update")?;
        Ok(())
    }

    fn get_patch(&self, id: &str) -> Result<Option<Patch>> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload FROM patches WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query patch")?;
        payload.map(|p| decode(&p, "patch")).transpose()
    }

    fn list_patches(&self, filter: &PatchFilter) -> Result<Vec<Patch>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT payload FROM patches
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR issue_id = ?2)
                 ORDER BY seq
                 LIMIT ?3",
            )
            .context("Failed to prepare list_patches")?;
        let limit = filter.limit.map(|n| n as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(
                params![filter.status.map(|s| s.as_str()), filter.issue_id, limit],
                |row| row.get::<_, String>(0),
            )
            .context("Failed to query patches")?;
        let mut patches = Vec::new();
        for row in rows {
            let payload = row.context("Failed to read patch row")?;
            patches.push(decode(&payload, "patch")?);
        }
        Ok(patches)
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let payload = serde_json::to_string(entry).context("Failed to encode audit entry")?;
        self.conn()?
            .execute(
                "INSERT INTO audit_log (id, patch_id, action, at, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.id,
                    entry.patch_id,
                    entry.action.as_str(),
                    entry.at.to_rfc3339(),
                    payload
                ],
            )
            .context("Failed to append audit entry")?;
        Ok(())
    }

    fn audit_trail(&self, patch_id: Option<&str>) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT payload FROM audit_log WHERE (?1 IS NULL OR patch_id = ?1) ORDER BY seq")
            .context("Failed to prepare audit_trail")?;
        let rows = stmt
            .query_map(params![patch_id], |row| row.get::<_, String>(0))
            .context("Failed to query audit log")?;
        let mut entries = Vec::new();
        for row in rows {
            let payload = row.context("Failed to read audit row")?;
            entries.push(decode(&payload, "audit")?);
        }
        Ok(entries)
    }

    fn save_attempt(&self, attempt: &ExecutionAttempt) -> Result<()> {
        let payload = serde_json::to_string(attempt).context("Failed to encode attempt")?;
        self.conn()?
            .execute(
                "INSERT INTO attempts (id, patch_id, started_ms, payload) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
                params![
                    attempt.id,
                    attempt.patch_id,
                    attempt.started_at.timestamp_millis(),
                    payload
                ],
            )
            .context("Failed to upsert attempt")?;
        Ok(())
    }

    fn list_attempts(&self, patch_id: &str) -> Result<Vec<ExecutionAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT payload FROM attempts WHERE patch_id = ?1 ORDER BY started_ms, seq")
            .context("Failed to prepare list_attempts")?;
        let rows = stmt
            .query_map(params![patch_id], |row| row.get::<_, String>(0))
            .context("Failed to query attempts")?;
        let mut attempts = Vec::new();
        for row in rows {
            let payload = row.context("Failed to read attempt row")?;
            attempts.push(decode(&payload, "attempt")?);
        }
        Ok(attempts)
    }

    fn execution_times_since(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT started_ms FROM attempts WHERE started_ms > ?1 ORDER BY started_ms")
            .context("Failed to prepare execution_times_since")?;
        let rows = stmt
            .query_map(params![since.timestamp_millis()], |row| row.get::<_, i64>(0))
            .context("Failed to query attempt times")?;
        let mut times = Vec::new();
        for row in rows {
            let ms = row.context("Failed to read attempt time")?;
            if let Some(ts) = DateTime::from_timestamp_millis(ms) {
                times.push(ts);
            }
        }
        Ok(times)
    }
}
