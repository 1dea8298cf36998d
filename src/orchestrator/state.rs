//! Patch state machine.
//!
//! ```text
//! received   -> validating | rejected
//! validating -> approved | rejected
//! rejected   -> approved                  (operator override of a soft rejection)
//! approved   -> executing | rejected
//! executing  -> executed | failed
//! failed     -> rolled_back
//! executed   -> rolled_back | failed      (operator rollback, complete or not)
//! rolled_back -> executing                (operator retry)
//! ```

use crate::models::PatchStatus;

pub fn is_valid_transition(from: PatchStatus, to: PatchStatus) -> bool {
    use PatchStatus::*;
    matches!(
        (from, to),
        (Received, Validating)
            | (Received, Rejected)
            | (Validating, Approved)
            | (Validating, Rejected)
            | (Rejected, Approved)
            | (Approved, Rejected)
            | (Approved, Executing)
            | (Executing, Executed)
            | (Executing, Failed)
            | (Failed, RolledBack)
            | (Executed, RolledBack)
            | (Executed, Failed)
            | (RolledBack, Executing)
    )
}

/// Statuses `execute` accepts.
pub fn can_execute(status: PatchStatus) -> bool {
    matches!(status, PatchStatus::Approved | PatchStatus::RolledBack)
}

/// Statuses `reject` accepts.
pub fn can_reject(status: PatchStatus) -> bool {
    matches!(status, PatchStatus::Received | PatchStatus::Approved)
}
