use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validate::ValidationResult;

/// Lifecycle of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Received,
    Validating,
    Approved,
    Rejected,
    Executing,
    Executed,
    Failed,
    RolledBack,
}

impl PatchStatus {
    pub const ALL: [PatchStatus; 8] = [
        Self::Received,
        Self::Validating,
        Self::Approved,
        Self::Rejected,
        Self::Executing,
        Self::Executed,
        Self::Failed,
        Self::RolledBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "validating" => Ok(Self::Validating),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "executing" => Ok(Self::Executing),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            _ => Err(format!("Invalid patch status: {}", s)),
        }
    }
}

/// A detected problem, as handed over by the issue source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDescriptor {
    pub id: String,
    pub category: String,
    pub severity: String,
    pub description: String,
    /// Advisory only. The authoritative file set always comes from the diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_files: Option<Vec<String>>,
}

/// Generator output for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedDiff {
    pub issue_id: String,
    pub patch_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub id: String,
    pub issue_id: String,
    pub patch_content: String,
    /// Always recomputed from `patch_content`.
    pub affected_files: Vec<String>,
    pub status: PatchStatus,
    /// 0-100.
    pub confidence: u8,
    pub validation_score: Option<u32>,
    #[serde(default)]
    pub validation: Option<ValidationResult>,
    /// Set when a `failed` patch could not be rolled back completely.
    #[serde(default)]
    pub rollback_failed: bool,
    /// Set when an operator approved a softly rejected patch.
    #[serde(default)]
    pub operator_override: bool,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patch {
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// One try at applying a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub id: String,
    pub patch_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub modified_files: Vec<String>,
    /// Manifest path, once a snapshot was written.
    pub backup_location: Option<String>,
    pub duration_ms: u64,
    pub rollback_triggered: bool,
    pub rollback_failed: bool,
    pub restored_count: usize,
    #[serde(default)]
    pub failed_paths: Vec<(String, String)>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub timed_out: bool,
    pub error: Option<String>,
}

impl ExecutionAttempt {
    pub fn start(patch_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patch_id: patch_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            modified_files: Vec::new(),
            backup_location: None,
            duration_ms: 0,
            rollback_triggered: false,
            rollback_failed: false,
            restored_count: 0,
            failed_paths: Vec::new(),
            cancelled: false,
            timed_out: false,
            error: None,
        }
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
    }
}

/// Query for `list_patches`. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchFilter {
    pub status: Option<PatchStatus>,
    pub issue_id: Option<String>,
    pub limit: Option<usize>,
}

impl PatchFilter {
    pub fn status(status: PatchStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, patch: &Patch) -> bool {
        self.status.is_none_or(|s| s == patch.status)
            && self.issue_id.as_deref().is_none_or(|i| i == patch.issue_id)
    }
}
