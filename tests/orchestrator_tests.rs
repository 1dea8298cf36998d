//! End-to-end scenarios for the orchestrator against a real working tree.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use patchwarden::audit::AuditAction;
use patchwarden::errors::PatchError;
use patchwarden::models::{GeneratedDiff, IssueDescriptor, PatchFilter, PatchStatus};
use patchwarden::orchestrator::{Orchestrator, OrchestratorConfig, PatchEvent};
use patchwarden::ratelimit::ManualClock;
use patchwarden::store::{MemoryStore, PatchStore, SqliteStore};

const NEW_FOO: &str = "diff --git a/foo.ts b/foo.ts\nnew file mode 100644\n--- /dev/null\n+++ b/foo.ts\n@@ -0,0 +1 @@\n+export const x = 1;\n";

fn issue(id: &str) -> IssueDescriptor {
    IssueDescriptor {
        id: id.to_string(),
        category: "bug".to_string(),
        severity: "medium".to_string(),
        description: "test issue".to_string(),
        affected_files: None,
    }
}

fn generated(issue_id: &str, diff: &str) -> GeneratedDiff {
    GeneratedDiff {
        issue_id: issue_id.to_string(),
        patch_content: diff.to_string(),
        confidence: None,
    }
}

fn new_file_diff(path: &str, line: &str) -> String {
    format!("--- /dev/null\n+++ b/{path}\n@@ -0,0 +1 @@\n+{line}\n")
}

fn orchestrator(dir: &TempDir) -> Orchestrator {
    Orchestrator::new(OrchestratorConfig::new(dir.path()), Arc::new(MemoryStore::new())).unwrap()
}

async fn approved(orch: &Orchestrator, issue_id: &str, diff: &str) -> String {
    let patch = orch
        .submit(&issue(issue_id), generated(issue_id, diff))
        .await
        .unwrap();
    assert_eq!(patch.status, PatchStatus::Approved);
    patch.id
}

#[tokio::test]
async fn test_new_file_is_approved_and_executed() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);

    let patch = orch.submit(&issue("I-1"), generated("I-1", NEW_FOO)).await.unwrap();
    assert_eq!(patch.status, PatchStatus::Approved);
    assert_eq!(patch.validation_score, Some(100));
    assert_eq!(patch.affected_files, vec!["foo.ts".to_string()]);

    let attempt = orch.execute(&patch.id).await.unwrap();
    assert!(attempt.success);
    assert_eq!(attempt.modified_files, vec!["foo.ts".to_string()]);
    assert_eq!(
        fs::read_to_string(dir.path().join("foo.ts")).unwrap(),
        "export const x = 1;\n"
    );
    assert_eq!(orch.get(&patch.id).unwrap().status, PatchStatus::Executed);
}

#[tokio::test]
async fn test_eval_is_rejected_and_cannot_execute() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);

    let err = orch
        .submit(&issue("I-2"), generated("I-2", &new_file_diff("run.js", "eval(userInput);")))
        .await
        .unwrap_err();
    let patch_id = match err {
        PatchError::ValidationFailed { patch_id, result } => {
            assert!(!result.security_passed);
            assert!(!result.errors.is_empty());
            patch_id
        }
        other => panic!("expected ValidationFailed, got {:?}", other),
    };

    let patch = orch.get(&patch_id).unwrap();
    assert_eq!(patch.status, PatchStatus::Rejected);
    assert!(patch.rejection_reason.is_some());

    // Hard rejection: no override, no execution.
    assert!(matches!(
        orch.approve(&patch_id).await,
        Err(PatchError::InvalidTransition { .. })
    ));
    assert!(matches!(
        orch.execute(&patch_id).await,
        Err(PatchError::InvalidTransition { .. })
    ));
    assert!(!dir.path().join("run.js").exists());
}

#[tokio::test]
async fn test_unparseable_diff_is_rejected() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);

    let err = orch
        .submit(&issue("I-3"), generated("I-3", "this is not a diff"))
        .await
        .unwrap_err();
    let PatchError::Parse { patch_id, .. } = err else {
        panic!("expected Parse, got {:?}", err);
    };
    assert_eq!(orch.get(&patch_id).unwrap().status, PatchStatus::Rejected);
}

#[tokio::test]
async fn test_unaddressable_hunk_range_is_rejected_not_stuck() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.ts"), "a\n").unwrap();
    let orch = orchestrator(&dir);

    let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1,1 +18446744073709551615,2 @@\n-a\n+b\n+c\n";
    let err = orch.submit(&issue("I-3b"), generated("I-3b", diff)).await.unwrap_err();
    let PatchError::Parse { patch_id, .. } = err else {
        panic!("expected Parse, got {:?}", err);
    };
    assert_eq!(orch.get(&patch_id).unwrap().status, PatchStatus::Rejected);
    let trail = orch.audit_trail(Some(&patch_id)).unwrap();
    assert_eq!(trail.last().unwrap().to, Some(PatchStatus::Rejected));
    assert_eq!(fs::read_to_string(dir.path().join("a.ts")).unwrap(), "a\n");
}

#[tokio::test]
async fn test_affected_files_come_from_diff_not_issue() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.ts"), "export const a = 1;\n").unwrap();
    fs::write(dir.path().join("README.md"), "readme\n").unwrap();
    let orch = orchestrator(&dir);

    let mut claimed = issue("I-3c");
    claimed.affected_files = Some(vec!["README.md".to_string(), "src/other.ts".to_string()]);
    let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-export const a = 1;\n+export const a = 2;\n\
                --- /dev/null\n+++ b/b.ts\n@@ -0,0 +1 @@\n+export const b = 1;\n";
    let patch = orch.submit(&claimed, generated("I-3c", diff)).await.unwrap();
    assert_eq!(patch.affected_files, vec!["a.ts".to_string(), "b.ts".to_string()]);

    let attempt = orch.execute(&patch.id).await.unwrap();
    let manifest = orch.backups().load(&attempt.id).unwrap();
    let captured: Vec<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(captured, vec!["a.ts"]);
    assert_eq!(manifest.absent, vec!["b.ts".to_string()]);
    assert_eq!(fs::read_to_string(dir.path().join("README.md")).unwrap(), "readme\n");
}

#[tokio::test]
async fn test_issue_mismatch_records_nothing() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);

    let err = orch.submit(&issue("I-4"), generated("OTHER", NEW_FOO)).await.unwrap_err();
    assert!(matches!(err, PatchError::IssueMismatch { .. }));
    assert!(orch.list(&PatchFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn test_second_file_failure_rolls_back_the_first() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.ts"), "export const a = 1;\n").unwrap();
    fs::write(dir.path().join("b.ts"), "export const b = 1;\n").unwrap();
    let orch = orchestrator(&dir);

    // b.ts context does not match the file on disk.
    let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-export const a = 1;\n+export const a = 2;\n\
                --- a/b.ts\n+++ b/b.ts\n@@ -1 +1 @@\n-export const b = 42;\n+export const b = 2;\n";
    let id = approved(&orch, "I-5", diff).await;

    let err = orch.execute(&id).await.unwrap_err();
    let PatchError::ExecutionFailed { attempt, .. } = err else {
        panic!("expected ExecutionFailed, got {:?}", err);
    };
    assert!(!attempt.success);
    assert!(attempt.rollback_triggered);
    assert!(!attempt.rollback_failed);
    assert_eq!(attempt.modified_files, vec!["a.ts".to_string()]);

    assert_eq!(
        fs::read_to_string(dir.path().join("a.ts")).unwrap(),
        "export const a = 1;\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("b.ts")).unwrap(),
        "export const b = 1;\n"
    );
    assert_eq!(orch.get(&id).unwrap().status, PatchStatus::RolledBack);

    let actions: Vec<AuditAction> = orch
        .audit_trail(Some(&id))
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        &actions[actions.len() - 3..],
        &[
            AuditAction::ExecutionStarted,
            AuditAction::ExecutionFailed,
            AuditAction::RolledBack
        ]
    );
}

#[tokio::test]
async fn test_retry_after_rollback_gets_new_attempt() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.ts"), "export const a = 0;\n").unwrap();
    let orch = orchestrator(&dir);

    let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-export const a = 1;\n+export const a = 2;\n";
    let id = approved(&orch, "I-6", diff).await;
    assert!(orch.execute(&id).await.is_err());
    assert_eq!(orch.get(&id).unwrap().status, PatchStatus::RolledBack);

    // Operator fixes the tree, then retries.
    fs::write(dir.path().join("a.ts"), "export const a = 1;\n").unwrap();
    let attempt = orch.execute(&id).await.unwrap();
    assert!(attempt.success);
    assert_eq!(orch.attempts(&id).unwrap().len(), 2);
    assert_eq!(
        fs::read_to_string(dir.path().join("a.ts")).unwrap(),
        "export const a = 2;\n"
    );
}

#[tokio::test]
async fn test_rate_limit_denies_sixth_execution() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let orch = Orchestrator::with_clock(
        OrchestratorConfig::new(dir.path()),
        Arc::new(MemoryStore::new()),
        clock.clone(),
    )
    .unwrap();

    let mut ids = Vec::new();
    for i in 0..6 {
        let diff = new_file_diff(&format!("f{i}.ts"), &format!("export const v{i} = {i};"));
        ids.push(approved(&orch, &format!("I-{i}"), &diff).await);
    }

    for id in &ids[..5] {
        orch.execute(id).await.unwrap();
        clock.advance(Duration::from_secs(60));
    }

    let err = orch.execute(&ids[5]).await.unwrap_err();
    let PatchError::RateLimited { retry_after_secs, .. } = err else {
        panic!("expected RateLimited, got {:?}", err);
    };
    assert!(retry_after_secs > 0 && retry_after_secs <= 3600);
    assert!(!dir.path().join("f5.ts").exists());
    // Deferral leaves the patch where it was.
    assert_eq!(orch.get(&ids[5]).unwrap().status, PatchStatus::Approved);
    let trail = orch.audit_trail(Some(&ids[5])).unwrap();
    let deferred = trail.last().unwrap();
    assert_eq!(deferred.action, AuditAction::ExecutionDeferred);
    assert_eq!(deferred.to, None);

    clock.advance(Duration::from_secs(3600));
    orch.execute(&ids[5]).await.unwrap();
    assert!(dir.path().join("f5.ts").exists());
}

#[tokio::test]
async fn test_rate_limit_window_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join(".patchwarden/patches.db");
    let mut config = OrchestratorConfig::new(dir.path());
    config.max_executions_per_hour = 1;

    let first = Orchestrator::new(config.clone(), Arc::new(SqliteStore::open(&db).unwrap())).unwrap();
    let a = approved(&first, "I-a", &new_file_diff("a.ts", "export const a = 1;")).await;
    let b = approved(&first, "I-b", &new_file_diff("b.ts", "export const b = 1;")).await;
    first.execute(&a).await.unwrap();
    drop(first);

    let second = Orchestrator::new(config, Arc::new(SqliteStore::open(&db).unwrap())).unwrap();
    assert!(matches!(
        second.execute(&b).await,
        Err(PatchError::RateLimited { .. })
    ));
}

#[tokio::test]
async fn test_rate_limit_shared_between_live_orchestrators() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn PatchStore> =
        Arc::new(SqliteStore::open(&dir.path().join(".patchwarden/patches.db")).unwrap());
    let mut config = OrchestratorConfig::new(dir.path());
    config.max_executions_per_hour = 1;

    // Both built before either executes, as two CLI processes would be.
    let first = Orchestrator::new(config.clone(), store.clone()).unwrap();
    let second = Orchestrator::new(config, store).unwrap();
    let a = approved(&first, "I-a", &new_file_diff("a.ts", "export const a = 1;")).await;
    let b = approved(&second, "I-b", &new_file_diff("b.ts", "export const b = 1;")).await;

    first.execute(&a).await.unwrap();
    assert!(matches!(
        second.execute(&b).await,
        Err(PatchError::RateLimited { .. })
    ));
    assert!(!dir.path().join("b.ts").exists());
    assert_eq!(second.get(&b).unwrap().status, PatchStatus::Approved);
}

#[tokio::test]
async fn test_unwritable_backup_dir_leaves_tree_untouched() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("blocker"), "a file where the backup dir should be").unwrap();
    fs::write(dir.path().join("a.ts"), "export const a = 1;\n").unwrap();
    let mut config = OrchestratorConfig::new(dir.path());
    config.backup_dir = "blocker".into();
    let orch = Orchestrator::new(config, Arc::new(MemoryStore::new())).unwrap();

    let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-export const a = 1;\n+export const a = 2;\n";
    let id = approved(&orch, "I-7", diff).await;

    let err = orch.execute(&id).await.unwrap_err();
    let PatchError::ExecutionFailed { attempt, .. } = err else {
        panic!("expected ExecutionFailed, got {:?}", err);
    };
    assert!(attempt.modified_files.is_empty());
    assert_eq!(attempt.restored_count, 0);
    assert!(attempt.error.unwrap().contains("backup"));
    assert_eq!(
        fs::read_to_string(dir.path().join("a.ts")).unwrap(),
        "export const a = 1;\n"
    );
    assert_eq!(orch.get(&id).unwrap().status, PatchStatus::RolledBack);
}

#[tokio::test]
async fn test_manifest_covers_modified_files_and_restore_is_idempotent() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.ts"), "export const a = 1;\n").unwrap();
    let orch = orchestrator(&dir);

    let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-export const a = 1;\n+export const a = 2;\n\
                --- /dev/null\n+++ b/c.ts\n@@ -0,0 +1 @@\n+export const c = 3;\n";
    let id = approved(&orch, "I-8", diff).await;
    let attempt = orch.execute(&id).await.unwrap();

    let manifest = orch.backups().load(&attempt.id).unwrap();
    for path in &attempt.modified_files {
        assert!(manifest.covers(path), "{} not in manifest", path);
    }

    let first = orch.backups().restore(&manifest);
    assert!(first.is_complete());
    let second = orch.backups().restore(&manifest);
    assert!(second.is_complete());
    assert_eq!(
        fs::read_to_string(dir.path().join("a.ts")).unwrap(),
        "export const a = 1;\n"
    );
    assert!(!dir.path().join("c.ts").exists());
}

#[tokio::test]
async fn test_operator_rollback_of_executed_patch() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);
    let id = approved(&orch, "I-9", NEW_FOO).await;
    orch.execute(&id).await.unwrap();
    assert!(dir.path().join("foo.ts").exists());

    let restored = orch.rollback(&id).await.unwrap();
    assert_eq!(restored, 1);
    assert!(!dir.path().join("foo.ts").exists());
    assert_eq!(orch.get(&id).unwrap().status, PatchStatus::RolledBack);

    // Nothing left to roll back.
    assert!(matches!(
        orch.rollback(&id).await,
        Err(PatchError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_soft_rejection_can_be_overridden() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);

    let diff = new_file_diff("util.ts", "export function id(x) { return x; }");
    let err = orch.submit(&issue("I-10"), generated("I-10", &diff)).await.unwrap_err();
    let PatchError::ValidationFailed { patch_id, result } = err else {
        panic!("expected ValidationFailed, got {:?}", err);
    };
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert!(!result.type_safety_passed);
    assert_eq!(result.score, 70);

    let patch = orch.approve(&patch_id).await.unwrap();
    assert_eq!(patch.status, PatchStatus::Approved);
    assert!(patch.operator_override);

    let trail = orch.audit_trail(Some(&patch_id)).unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.action, AuditAction::Approved);
    assert_eq!(last.actor, "operator");
    assert_eq!(last.details["override"], true);
}

#[tokio::test]
async fn test_reject_from_received_and_approved() {
    let dir = TempDir::new().unwrap();
    let mut config = OrchestratorConfig::new(dir.path());
    config.auto_validate = false;
    let orch = Orchestrator::new(config, Arc::new(MemoryStore::new())).unwrap();

    let received = orch.submit(&issue("I-11"), generated("I-11", NEW_FOO)).await.unwrap();
    assert_eq!(received.status, PatchStatus::Received);
    let rejected = orch.reject(&received.id, "not needed").await.unwrap();
    assert_eq!(rejected.status, PatchStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("not needed"));

    let other = orch.submit(&issue("I-12"), generated("I-12", NEW_FOO)).await.unwrap();
    let approved = orch.approve(&other.id).await.unwrap();
    assert_eq!(approved.status, PatchStatus::Approved);
    assert_eq!(approved.validation_score, Some(100));
    let rejected = orch.reject(&other.id, "changed my mind").await.unwrap();
    assert_eq!(rejected.status, PatchStatus::Rejected);

    // An operator's rejection of a passing patch is not a soft failure.
    assert!(matches!(
        orch.approve(&other.id).await,
        Err(PatchError::InvalidTransition { .. })
    ));
    // Never validated at all: nothing to override either.
    assert!(matches!(
        orch.approve(&received.id).await,
        Err(PatchError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_audit_trail_matches_transitions() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);
    let id = approved(&orch, "I-13", NEW_FOO).await;
    orch.execute(&id).await.unwrap();

    let trail = orch.audit_trail(Some(&id)).unwrap();
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Submitted,
            AuditAction::ValidationStarted,
            AuditAction::Approved,
            AuditAction::ExecutionStarted,
            AuditAction::Executed,
        ]
    );
    for pair in trail.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
        assert!(pair[0].at <= pair[1].at);
    }
    assert_eq!(trail.last().unwrap().to, Some(orch.get(&id).unwrap().status));
}

#[tokio::test]
async fn test_events_follow_transitions() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);
    let mut rx = orch.subscribe();

    let id = approved(&orch, "I-14", NEW_FOO).await;
    orch.execute(&id).await.unwrap();

    let mut statuses = Vec::new();
    let mut backup_seen = false;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.patch_id(), id);
        match event {
            PatchEvent::Transition { to, .. } => statuses.push(to),
            PatchEvent::BackupCaptured { .. } => {
                assert_eq!(statuses.last(), Some(&PatchStatus::Executing));
                backup_seen = true;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(backup_seen);
    assert_eq!(
        statuses,
        vec![
            PatchStatus::Received,
            PatchStatus::Validating,
            PatchStatus::Approved,
            PatchStatus::Executing,
            PatchStatus::Executed,
        ]
    );
}

#[tokio::test]
async fn test_cancelled_execution_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);
    let id = approved(&orch, "I-15", NEW_FOO).await;

    let token = CancellationToken::new();
    token.cancel();
    let err = orch.execute_with_cancel(&id, token).await.unwrap_err();
    let PatchError::ExecutionFailed { attempt, .. } = err else {
        panic!("expected ExecutionFailed, got {:?}", err);
    };
    assert!(attempt.cancelled);
    assert!(!dir.path().join("foo.ts").exists());
    assert_eq!(orch.get(&id).unwrap().status, PatchStatus::RolledBack);
}

#[tokio::test]
async fn test_concurrent_execute_of_same_patch_runs_once() {
    let dir = TempDir::new().unwrap();
    let orch = Arc::new(orchestrator(&dir));
    let id = approved(&orch, "I-16", NEW_FOO).await;

    let (a, b) = tokio::join!(
        {
            let orch = orch.clone();
            let id = id.clone();
            async move { orch.execute(&id).await }
        },
        {
            let orch = orch.clone();
            let id = id.clone();
            async move { orch.execute(&id).await }
        }
    );
    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    assert_eq!(orch.attempts(&id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_path_policy_blocks_denied_paths() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);
    let diff = new_file_diff(".git/hooks/pre-commit", "echo hi");
    let err = orch.submit(&issue("I-17"), generated("I-17", &diff)).await.unwrap_err();
    let PatchError::ValidationFailed { result, .. } = err else {
        panic!("expected ValidationFailed, got {:?}", err);
    };
    assert!(result.errors.iter().any(|e| e.starts_with("[paths]")));
}

#[test]
fn test_store_backends_agree_on_empty_state() {
    let dir = TempDir::new().unwrap();
    let stores: Vec<Box<dyn PatchStore>> = vec![
        Box::new(MemoryStore::new()),
        Box::new(SqliteStore::open(&dir.path().join("p.db")).unwrap()),
    ];
    for store in stores {
        assert!(store.list_patches(&PatchFilter::default()).unwrap().is_empty());
        assert!(store.audit_trail(None).unwrap().is_empty());
    }
}

/// A diff whose second change collides with a directory the first change
/// created: apply fails, and restore cannot remove that directory either.
const COLLIDING: &str = "--- /dev/null\n+++ b/n/x.ts\n@@ -0,0 +1 @@\n+export const x = 1;\n\
                         --- /dev/null\n+++ b/n\n@@ -0,0 +1 @@\n+plain\n";

#[tokio::test]
async fn test_failed_restore_after_failed_apply_is_unrecoverable() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);
    let id = approved(&orch, "I-18", COLLIDING).await;
    let mut rx = orch.subscribe();

    let err = orch.execute(&id).await.unwrap_err();
    let PatchError::Unrecoverable { attempt, .. } = err else {
        panic!("expected Unrecoverable, got {:?}", err);
    };
    assert!(attempt.rollback_triggered);
    assert!(attempt.rollback_failed);
    assert!(attempt.failed_paths.iter().any(|(path, _)| path == "n"));

    let patch = orch.get(&id).unwrap();
    assert_eq!(patch.status, PatchStatus::Failed);
    assert!(patch.rollback_failed);

    let last = orch.audit_trail(Some(&id)).unwrap().pop().unwrap();
    assert_eq!(last.action, AuditAction::RollbackFailed);
    assert_eq!(last.to, Some(PatchStatus::Failed));

    let mut incomplete = None;
    while let Ok(event) = rx.try_recv() {
        if let PatchEvent::RollbackIncomplete { failed_paths, .. } = event {
            incomplete = Some(failed_paths);
        }
    }
    assert_eq!(incomplete, Some(vec!["n".to_string()]));
}

#[tokio::test]
async fn test_operator_rollback_finishes_incomplete_restore() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir);
    let id = approved(&orch, "I-19", COLLIDING).await;
    assert!(matches!(
        orch.execute(&id).await,
        Err(PatchError::Unrecoverable { .. })
    ));

    // Still blocked: the retry fails the same way and stays failed.
    assert!(matches!(orch.rollback(&id).await, Err(PatchError::Rollback { .. })));
    let patch = orch.get(&id).unwrap();
    assert_eq!(patch.status, PatchStatus::Failed);
    assert!(patch.rollback_failed);
    let trail = orch.audit_trail(Some(&id)).unwrap();
    let retry = trail.last().unwrap();
    assert_eq!(retry.action, AuditAction::RollbackFailed);
    assert_eq!((retry.from, retry.to), (Some(PatchStatus::Failed), None));

    // Once the operator clears the obstruction the rollback completes.
    fs::remove_dir_all(dir.path().join("n")).unwrap();
    orch.rollback(&id).await.unwrap();
    let patch = orch.get(&id).unwrap();
    assert_eq!(patch.status, PatchStatus::RolledBack);
    assert!(!patch.rollback_failed);
    assert!(!dir.path().join("n").exists());
}
