use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::PatchStatus;

const EVENT_CAPACITY: usize = 256;

/// Something observers may want to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PatchEvent {
    Transition {
        patch_id: String,
        from: Option<PatchStatus>,
        to: PatchStatus,
        actor: String,
        at: DateTime<Utc>,
    },
    /// The manifest for an attempt is on disk; mutation may begin.
    BackupCaptured {
        patch_id: String,
        attempt_id: String,
        files: usize,
        location: String,
    },
    ExecutionDeferred {
        patch_id: String,
        retry_after_secs: u64,
    },
    /// Rollback left some paths unrestored.
    RollbackIncomplete {
        patch_id: String,
        failed_paths: Vec<String>,
    },
}

impl PatchEvent {
    pub fn patch_id(&self) -> &str {
        match self {
            Self::Transition { patch_id, .. }
            | Self::BackupCaptured { patch_id, .. }
            | Self::ExecutionDeferred { patch_id, .. }
            | Self::RollbackIncomplete { patch_id, .. } => patch_id,
        }
    }
}

/// Fan-out of [`PatchEvent`]s. Emitting with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PatchEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: PatchEvent) {
        trace!(?event, "Emitting event");
        let _ = self.tx.send(event); // Ignore error if no receivers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PatchEvent> {
        self.tx.subscribe()
    }
}
