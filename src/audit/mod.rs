//! Audit trail records.
//!
//! Every status transition, and every refused execution, produces one
//! [`AuditEntry`]. Entries are appended to the store before the status
//! change they describe is written, so the trail is never behind the
//! patch table. There is no API to edit or delete an entry.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PatchStatus;

/// Actor name for transitions the orchestrator makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Submitted,
    ValidationStarted,
    Approved,
    Rejected,
    ExecutionStarted,
    Executed,
    ExecutionFailed,
    RolledBack,
    RollbackFailed,
    ExecutionDeferred,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::ValidationStarted => "validation_started",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ExecutionStarted => "execution_started",
            Self::Executed => "executed",
            Self::ExecutionFailed => "execution_failed",
            Self::RolledBack => "rolled_back",
            Self::RollbackFailed => "rollback_failed",
            Self::ExecutionDeferred => "execution_deferred",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "validation_started" => Ok(Self::ValidationStarted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "execution_started" => Ok(Self::ExecutionStarted),
            "executed" => Ok(Self::Executed),
            "execution_failed" => Ok(Self::ExecutionFailed),
            "rolled_back" => Ok(Self::RolledBack),
            "rollback_failed" => Ok(Self::RollbackFailed),
            "execution_deferred" => Ok(Self::ExecutionDeferred),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub patch_id: String,
    /// `None` for the entry that creates the patch.
    pub from: Option<PatchStatus>,
    /// `None` for entries that record a refusal rather than a transition.
    pub to: Option<PatchStatus>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(actor: &str, action: AuditAction, patch_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            at: Utc::now(),
            actor: actor.to_string(),
            action,
            patch_id: patch_id.to_string(),
            from: None,
            to: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn transition(mut self, from: Option<PatchStatus>, to: PatchStatus) -> Self {
        self.from = from;
        self.to = Some(to);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// One-line rendering for terminals.
    pub fn summary(&self) -> String {
        let arrow = match (self.from, self.to) {
            (Some(f), Some(t)) => format!("{} -> {}", f, t),
            (None, Some(t)) => format!("-> {}", t),
            _ => String::new(),
        };
        format!(
            "{} {:<20} {:<10} {}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.action.as_str(),
            self.actor,
            arrow
        )
        .trim_end()
        .to_string()
    }
}

/// Export formats for `audit --export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    JsonLines,
}

impl ExportFormat {
    /// `.jsonl` means JSON lines, anything else a pretty JSON array.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") => Self::JsonLines,
            _ => Self::Json,
        }
    }
}

pub fn export<W: Write>(entries: &[AuditEntry], format: ExportFormat, mut out: W) -> Result<()> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut out, entries).context("Failed to serialize audit trail")?;
            writeln!(out)?;
        }
        ExportFormat::JsonLines => {
            for entry in entries {
                serde_json::to_writer(&mut out, entry).context("Failed to serialize audit entry")?;
                writeln!(out)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
