//! Patch application.
//!
//! Replays parsed [`FileChange`]s against a working tree. Modified files are
//! rebuilt line by line from the original content plus hunks; any
//! disagreement between a hunk and the file is a hard error, never a silent
//! truncation. Every write is atomic, so a stop between files never leaves a
//! half-written file behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::diff::{FileChange, Hunk, LineOp};
use crate::errors::{ApplyError, PartialApply};
use crate::util::atomic_write;

/// Applies file changes inside one working directory.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    work_dir: PathBuf,
}

impl PatchApplier {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Apply every change in order and return the paths actually modified.
    pub fn apply(&self, changes: &[FileChange]) -> Result<Vec<String>, PartialApply> {
        self.apply_with_cancel(changes, &CancellationToken::new())
    }

    /// Like [`apply`](Self::apply), checking `cancel` before each file.
    ///
    /// On failure the returned [`PartialApply`] lists the files already
    /// written so the caller knows what a restore has to cover.
    pub fn apply_with_cancel(
        &self,
        changes: &[FileChange],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PartialApply> {
        let mut modified: Vec<String> = Vec::new();

        for change in changes {
            if cancel.is_cancelled() {
                return Err(PartialApply {
                    modified,
                    error: ApplyError::Cancelled {
                        path: change.path().to_string(),
                    },
                });
            }

            match self.apply_one(change) {
                Ok(true) => {
                    debug!(path = change.path(), kind = %change.kind(), "Applied change");
                    modified.push(change.path().to_string());
                }
                Ok(false) => {
                    debug!(path = change.path(), "Change already in place, nothing written");
                }
                Err(error) => return Err(PartialApply { modified, error }),
            }
        }

        if let Err(error) = self.verify(changes) {
            return Err(PartialApply { modified, error });
        }

        info!(files = modified.len(), "Patch applied");
        Ok(modified)
    }

    /// Returns whether anything was written.
    fn apply_one(&self, change: &FileChange) -> Result<bool, ApplyError> {
        let target = self.work_dir.join(change.path());
        match change {
            FileChange::Create { path, content } => create_file(path, &target, content),
            FileChange::Modify {
                path,
                hunks,
                new_eof_newline,
            } => {
                let original = read_text(path, &target)?;
                let patched = apply_hunks(path, &original, hunks, *new_eof_newline)?;
                write_file(&target, &patched)?;
                Ok(true)
            }
            FileChange::Delete { .. } => match fs::remove_file(&target) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(source) => Err(ApplyError::Io {
                    path: target,
                    source,
                }),
            },
        }
    }

    /// Re-read every touched path and confirm it matches what the diff asked for.
    fn verify(&self, changes: &[FileChange]) -> Result<(), ApplyError> {
        for change in changes {
            let target = self.work_dir.join(change.path());
            let path = change.path().to_string();
            match change {
                FileChange::Delete { .. } => {
                    if target.exists() {
                        return Err(ApplyError::Verification {
                            path,
                            reason: "file still exists after delete".into(),
                        });
                    }
                }
                FileChange::Create { content, .. } => {
                    let actual = fs::read(&target).map_err(|e| ApplyError::Verification {
                        path: path.clone(),
                        reason: format!("unreadable after write: {}", e),
                    })?;
                    if actual != content.as_bytes() {
                        return Err(ApplyError::Verification {
                            path,
                            reason: "content differs from the diff".into(),
                        });
                    }
                }
                FileChange::Modify { hunks, .. } => {
                    let meta = fs::metadata(&target).map_err(|e| ApplyError::Verification {
                        path: path.clone(),
                        reason: format!("missing after write: {}", e),
                    })?;
                    let expects_content = hunks.iter().any(|h| h.new_lines > 0);
                    if meta.len() == 0 && expects_content {
                        return Err(ApplyError::Verification {
                            path,
                            reason: "file is empty but the diff leaves content".into(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn create_file(path: &str, target: &Path, content: &str) -> Result<bool, ApplyError> {
    match fs::read(target) {
        Ok(existing) if existing == content.as_bytes() => return Ok(false),
        Ok(_) => {
            return Err(ApplyError::WouldOverwrite {
                path: path.to_string(),
            });
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ApplyError::Io {
                path: target.to_path_buf(),
                source,
            });
        }
    }
    write_file(target, content)?;
    Ok(true)
}

fn read_text(path: &str, target: &Path) -> Result<String, ApplyError> {
    let bytes = match fs::read(target) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApplyError::MissingFile {
                path: path.to_string(),
            });
        }
        Err(source) => {
            return Err(ApplyError::Io {
                path: target.to_path_buf(),
                source,
            });
        }
    };
    String::from_utf8(bytes).map_err(|_| ApplyError::NotUtf8 {
        path: path.to_string(),
    })
}

fn write_file(target: &Path, content: &str) -> Result<(), ApplyError> {
    atomic_write(target, content.as_bytes()).map_err(|source| ApplyError::Io {
        path: target.to_path_buf(),
        source,
    })
}

/// Split text into lines, keeping `\r` so CRLF files round-trip.
fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n').unwrap_or(text).split('\n').collect()
}

fn same_line(actual: &str, expected: &str) -> bool {
    actual.strip_suffix('\r').unwrap_or(actual) == expected
}

/// Rebuild a file from its original content and the diff's hunks.
///
/// Hunks must be in ascending, non-overlapping order, their declared counts
/// must match their operations, and every context/removed line must match
/// the original text at that position.
pub fn apply_hunks(
    path: &str,
    original: &str,
    hunks: &[Hunk],
    new_eof_newline: Option<bool>,
) -> Result<String, ApplyError> {
    let old = split_lines(original);
    let crlf = old.first().map(|l| l.ends_with('\r')).unwrap_or(false);
    let mut out: Vec<String> = Vec::with_capacity(old.len());
    let mut cursor = 0usize;

    for (n, hunk) in hunks.iter().enumerate() {
        let hunk_no = n + 1;
        let (actual_old, actual_new) = (hunk.consumed(), hunk.emitted());
        if actual_old != hunk.old_lines || actual_new != hunk.new_lines {
            return Err(ApplyError::CountMismatch {
                path: path.to_string(),
                hunk: hunk_no,
                declared_old: hunk.old_lines,
                declared_new: hunk.new_lines,
                actual_old,
                actual_new,
            });
        }

        // A pure insertion's old_start names the line it follows.
        let start = if hunk.old_lines == 0 {
            hunk.old_start
        } else if hunk.old_start == 0 {
            return Err(ApplyError::HunkOutOfRange {
                path: path.to_string(),
                hunk: hunk_no,
                old_start: 0,
                file_lines: old.len(),
            });
        } else {
            hunk.old_start - 1
        };

        if start < cursor {
            return Err(ApplyError::HunkOverlap {
                path: path.to_string(),
                hunk: hunk_no,
                old_start: hunk.old_start,
            });
        }
        if start.checked_add(hunk.old_lines).is_none_or(|end| end > old.len()) {
            return Err(ApplyError::HunkOutOfRange {
                path: path.to_string(),
                hunk: hunk_no,
                old_start: hunk.old_start,
                file_lines: old.len(),
            });
        }

        out.extend(old[cursor..start].iter().map(|l| l.to_string()));
        cursor = start;

        for op in &hunk.ops {
            match op {
                LineOp::Add(text) => {
                    if crlf {
                        out.push(format!("{}\r", text));
                    } else {
                        out.push(text.clone());
                    }
                }
                LineOp::Context(expected) | LineOp::Remove(expected) => {
                    let actual = old[cursor];
                    if !same_line(actual, expected) {
                        return Err(ApplyError::ContextMismatch {
                            path: path.to_string(),
                            hunk: hunk_no,
                            line: cursor + 1,
                            expected: expected.clone(),
                            found: actual.strip_suffix('\r').unwrap_or(actual).to_string(),
                        });
                    }
                    if matches!(op, LineOp::Context(_)) {
                        out.push(actual.to_string());
                    }
                    cursor += 1;
                }
            }
        }
    }

    let touched_eof = !hunks.is_empty() && cursor == old.len();
    out.extend(old[cursor..].iter().map(|l| l.to_string()));

    if out.is_empty() {
        return Ok(String::new());
    }

    let eof_newline = match new_eof_newline {
        Some(false) => false,
        _ if touched_eof => true,
        _ => original.ends_with('\n'),
    };

    let mut result = out.join("\n");
    if eof_newline {
        result.push('\n');
    }
    Ok(result)
}
