//! Patch lifecycle commands: submit, approve, reject, execute, rollback,
//! show and list.

use anyhow::{Context, Result, bail};
use console::style;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use patchwarden::errors::PatchError;
use patchwarden::models::{
    ExecutionAttempt, GeneratedDiff, IssueDescriptor, Patch, PatchFilter, PatchStatus,
};
use patchwarden::orchestrator::Orchestrator;
use patchwarden::orchestrator::locks::ProcessLock;
use patchwarden::util::extract_json_object;
use patchwarden::validate::ValidationResult;

use super::super::Cli;
use super::open_orchestrator;

const PROCESS_LOCK_WAIT: Duration = Duration::from_secs(30);

fn status_style(status: PatchStatus) -> console::StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        PatchStatus::Approved | PatchStatus::Executed => s.green(),
        PatchStatus::Rejected | PatchStatus::Failed => s.red(),
        PatchStatus::RolledBack => s.yellow(),
        PatchStatus::Validating | PatchStatus::Executing => s.cyan(),
        PatchStatus::Received => s.dim(),
    }
}

/// Accept a full id or a unique prefix of one.
pub(crate) fn resolve_id(orchestrator: &Orchestrator, id: &str) -> Result<String> {
    match orchestrator.get(id) {
        Ok(patch) => return Ok(patch.id),
        Err(PatchError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    let matches: Vec<Patch> = orchestrator
        .list(&PatchFilter::default())?
        .into_iter()
        .filter(|p| p.id.starts_with(id))
        .collect();
    match matches.as_slice() {
        [patch] => Ok(patch.id.clone()),
        [] => bail!("No patch with id '{}'", id),
        _ => bail!("Patch id prefix '{}' is ambiguous ({} matches)", id, matches.len()),
    }
}

/// Read generator output: either a JSON object carrying `patchContent`, or
/// a bare unified diff.
fn read_generated(path: &Path, issue_id: &str, confidence: Option<u8>) -> Result<GeneratedDiff> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read diff file: {}", path.display()))?;

    if !raw.trim_start().starts_with("diff ")
        && !raw.trim_start().starts_with("---")
        && let Some(json) = extract_json_object(&raw)
        && let Ok(mut generated) = serde_json::from_str::<GeneratedDiff>(&json)
    {
        if confidence.is_some() {
            generated.confidence = confidence;
        }
        return Ok(generated);
    }

    Ok(GeneratedDiff {
        issue_id: issue_id.to_string(),
        patch_content: raw,
        confidence,
    })
}

fn print_validation(result: &ValidationResult) {
    let mark = |ok: bool| {
        if ok {
            style("pass").green()
        } else {
            style("fail").red()
        }
    };
    println!(
        "  score {} / min {}   syntax {}  type-safety {}  dependency {}  security {}",
        result.score,
        result.min_score,
        mark(result.syntax_passed),
        mark(result.type_safety_passed),
        mark(result.dependency_passed),
        mark(result.security_passed),
    );
    for error in &result.errors {
        println!("  {} {}", style("error").red(), error);
    }
    for warning in &result.warnings {
        println!("  {} {}", style("warn").yellow(), warning);
    }
}

fn print_attempt(attempt: &ExecutionAttempt) {
    let outcome = if attempt.success {
        style("success").green()
    } else if attempt.rollback_failed {
        style("rollback incomplete").red().bold()
    } else if attempt.rollback_triggered {
        style("rolled back").yellow()
    } else {
        style("failed").red()
    };
    println!(
        "  {} {}  {}  {}ms",
        attempt.started_at.format("%Y-%m-%d %H:%M:%S"),
        &attempt.id[..attempt.id.len().min(8)],
        outcome,
        attempt.duration_ms
    );
    if !attempt.modified_files.is_empty() {
        println!("    modified: {}", attempt.modified_files.join(", "));
    }
    if let Some(error) = &attempt.error {
        println!("    error: {}", error);
    }
    if attempt.cancelled {
        println!("    cancelled by operator");
    }
    if attempt.timed_out {
        println!("    exceeded time budget");
    }
    if attempt.rollback_triggered {
        println!("    restored: {}", attempt.restored_count);
    }
    for (path, reason) in &attempt.failed_paths {
        println!("    {} {}: {}", style("unrestored").red(), path, reason);
    }
    if let Some(location) = &attempt.backup_location {
        println!("    backup: {}", location);
    }
}

pub async fn cmd_submit(
    project_dir: &Path,
    cli: &Cli,
    issue_path: &Path,
    diff_path: &Path,
    confidence: Option<u8>,
) -> Result<()> {
    let (_config, orchestrator) = open_orchestrator(project_dir, cli)?;

    let issue_raw = std::fs::read_to_string(issue_path)
        .with_context(|| format!("Failed to read issue file: {}", issue_path.display()))?;
    let issue: IssueDescriptor = serde_json::from_str(&issue_raw)
        .with_context(|| format!("Invalid issue descriptor: {}", issue_path.display()))?;
    let generated = read_generated(diff_path, &issue.id, confidence)?;

    match orchestrator.submit(&issue, generated).await {
        Ok(patch) => {
            println!("id: {}", patch.id);
            println!("status: {}", status_style(patch.status));
            println!("confidence: {}", patch.confidence);
            println!("files: {}", patch.affected_files.join(", "));
            if let Some(result) = &patch.validation {
                print_validation(result);
            }
            Ok(())
        }
        Err(PatchError::ValidationFailed { patch_id, result }) => {
            println!("id: {}", patch_id);
            println!("status: {}", status_style(PatchStatus::Rejected));
            print_validation(&result);
            bail!("Patch {} rejected by validation (score {})", patch_id, result.score)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn cmd_approve(project_dir: &Path, cli: &Cli, id: &str) -> Result<()> {
    let (_config, orchestrator) = open_orchestrator(project_dir, cli)?;
    let id = resolve_id(&orchestrator, id)?;

    match orchestrator.approve(&id).await {
        Ok(patch) => {
            println!("Patch {} {}", patch.short_id(), status_style(patch.status));
            if patch.operator_override {
                println!("  (operator override of a soft rejection)");
            }
            if let Some(result) = &patch.validation {
                print_validation(result);
            }
            Ok(())
        }
        Err(PatchError::ValidationFailed { patch_id, result }) => {
            print_validation(&result);
            bail!("Patch {} rejected by validation (score {})", patch_id, result.score)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn cmd_reject(project_dir: &Path, cli: &Cli, id: &str, reason: &str) -> Result<()> {
    let (_config, orchestrator) = open_orchestrator(project_dir, cli)?;
    let id = resolve_id(&orchestrator, id)?;
    let patch = orchestrator.reject(&id, reason).await?;
    println!("Patch {} {}: {}", patch.short_id(), status_style(patch.status), reason);
    Ok(())
}

pub async fn cmd_execute(project_dir: &Path, cli: &Cli, id: &str) -> Result<()> {
    let (config, orchestrator) = open_orchestrator(project_dir, cli)?;
    let id = resolve_id(&orchestrator, id)?;
    let _lock = ProcessLock::acquire(&config.lock_path(), PROCESS_LOCK_WAIT)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received; stopping at the next file and rolling back");
            on_signal.cancel();
        }
    });

    let result = orchestrator.execute_with_cancel(&id, cancel).await;
    watcher.abort();

    match result {
        Ok(attempt) => {
            println!("Patch {} {}", &id[..id.len().min(8)], status_style(PatchStatus::Executed));
            print_attempt(&attempt);
            Ok(())
        }
        Err(PatchError::RateLimited {
            retry_after_secs, ..
        }) => {
            bail!(
                "Execution deferred: rate limit reached, retry in {}s",
                retry_after_secs
            )
        }
        Err(PatchError::ExecutionFailed { patch_id, attempt }) => {
            println!(
                "Patch {} {}",
                &patch_id[..patch_id.len().min(8)],
                status_style(PatchStatus::RolledBack)
            );
            print_attempt(&attempt);
            bail!("Execution failed; all changes were rolled back")
        }
        Err(PatchError::Unrecoverable { patch_id, attempt }) => {
            println!(
                "Patch {} {}",
                &patch_id[..patch_id.len().min(8)],
                status_style(PatchStatus::Failed)
            );
            print_attempt(&attempt);
            bail!(
                "Execution failed and rollback is incomplete; run 'patchwarden rollback {}' after fixing the paths above",
                patch_id
            )
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn cmd_rollback(project_dir: &Path, cli: &Cli, id: &str) -> Result<()> {
    use dialoguer::Confirm;

    let (config, orchestrator) = open_orchestrator(project_dir, cli)?;
    let id = resolve_id(&orchestrator, id)?;
    let patch = orchestrator.get(&id)?;

    if !cli.yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Restore {} file(s) changed by patch {}?",
                patch.affected_files.len(),
                patch.short_id()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Rollback cancelled.");
            return Ok(());
        }
    }

    let _lock = ProcessLock::acquire(&config.lock_path(), PROCESS_LOCK_WAIT)?;
    match orchestrator.rollback(&id).await {
        Ok(restored) => {
            println!(
                "Patch {} {} ({} path(s) restored)",
                patch.short_id(),
                status_style(PatchStatus::RolledBack),
                restored
            );
            Ok(())
        }
        Err(PatchError::Rollback { source, .. }) => {
            for (path, reason) in &source.failed {
                println!("  {} {}: {}", style("unrestored").red(), path, reason);
            }
            Err(source).context("Rollback incomplete")
        }
        Err(e) => Err(e.into()),
    }
}

pub fn cmd_show(project_dir: &Path, cli: &Cli, id: &str) -> Result<()> {
    let (_config, orchestrator) = open_orchestrator(project_dir, cli)?;
    let id = resolve_id(&orchestrator, id)?;
    let patch = orchestrator.get(&id)?;

    println!();
    println!("Patch {}", style(&patch.id).bold());
    println!("  issue:      {}", patch.issue_id);
    println!("  status:     {}", status_style(patch.status));
    println!("  confidence: {}", patch.confidence);
    println!("  created:    {}", patch.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  updated:    {}", patch.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  files:      {}", patch.affected_files.join(", "));
    if let Some(reason) = &patch.rejection_reason {
        println!("  reason:     {}", reason);
    }
    if patch.operator_override {
        println!("  approved by operator override");
    }
    if patch.rollback_failed {
        println!(
            "  {}",
            style("last rollback incomplete; manual recovery may be needed").red()
        );
    }

    if let Some(result) = &patch.validation {
        println!();
        println!("Validation:");
        print_validation(result);
    }

    let attempts = orchestrator.attempts(&id)?;
    if !attempts.is_empty() {
        println!();
        println!("Attempts:");
        for attempt in &attempts {
            print_attempt(attempt);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_list(
    project_dir: &Path,
    cli: &Cli,
    status: Option<&str>,
    issue: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let (_config, orchestrator) = open_orchestrator(project_dir, cli)?;
    let status = status
        .map(|s| s.parse::<PatchStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let filter = PatchFilter {
        status,
        issue_id: issue.map(str::to_string),
        limit,
    };
    let patches = orchestrator.list(&filter)?;

    if patches.is_empty() {
        println!("No patches.");
        return Ok(());
    }

    println!();
    println!(
        "{:<10} {:<20} {:<12} {:>5} {:>5}  Files",
        "Id", "Issue", "Status", "Score", "Conf"
    );
    println!(
        "{:<10} {:<20} {:<12} {:>5} {:>5}  -----",
        "--------", "-----", "------", "-----", "----"
    );
    for patch in &patches {
        let score = patch
            .validation_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<20} {:<12} {:>5} {:>5}  {}",
            patch.short_id(),
            patch.issue_id,
            status_style(patch.status),
            score,
            patch.confidence,
            patch.affected_files.join(", ")
        );
    }
    println!();
    Ok(())
}
