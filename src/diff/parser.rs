//! Unified diff parsing.
//!
//! Two independent entry points:
//! - [`parse`] turns diff text into [`FileChange`]s.
//! - [`affected_files`] scans header lines only, so the set of touched paths
//!   is known even when a hunk inside the diff is malformed.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::{DEV_NULL, FileChange, Hunk, LineOp};
use crate::errors::ParseError;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
});

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Parse unified diff text into per-file changes.
///
/// Never touches disk. A diff with no recognizable file section yields an
/// empty list; the caller decides that such a patch is inapplicable.
/// Malformed hunk headers are skipped with a warning. Paths that escape the
/// working tree are a hard [`ParseError`].
pub fn parse(diff: &str) -> Result<Vec<FileChange>, ParseError> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut changes = Vec::new();

    for section in split_sections(&lines) {
        if let Some(change) = parse_section(section)? {
            changes.push(change);
        }
    }

    Ok(changes)
}

/// Paths named by `diff --git`, `---` and `+++` headers, minus `/dev/null`.
///
/// Sorted and deduplicated. Independent of hunk parsing.
pub fn affected_files(diff: &str) -> Vec<String> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut paths = BTreeSet::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some((old, new)) = split_git_header(rest) {
                paths.insert(old);
                paths.insert(new);
            }
        } else if is_header_pair(&lines, i) {
            paths.insert(header_path(&line[4..]));
            paths.insert(header_path(&lines[i + 1][4..]));
        }
    }

    paths
        .into_iter()
        .filter(|p| !p.is_empty() && p != DEV_NULL)
        .collect()
}

/// A `---` line immediately followed by a `+++` line.
fn is_header_pair(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ")
        && lines
            .get(i + 1)
            .map(|next| next.starts_with("+++ "))
            .unwrap_or(false)
}

/// Split diff lines into file sections.
///
/// A section starts at a `diff --git` line, or at a `---`/`+++` pair when the
/// current section already has its own pair (plain multi-file diffs).
/// Anything before the first section is preamble and ignored.
fn split_sections<'a>(lines: &'a [&'a str]) -> Vec<&'a [&'a str]> {
    let mut starts = Vec::new();
    let mut in_git_section = false;
    let mut has_pair = false;

    for i in 0..lines.len() {
        if lines[i].starts_with("diff --git ") {
            starts.push(i);
            in_git_section = true;
            has_pair = false;
        } else if is_header_pair(lines, i) {
            if !(in_git_section && !has_pair) {
                starts.push(i);
                in_git_section = false;
            }
            has_pair = true;
        }
    }

    let mut sections = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(lines.len());
        sections.push(&lines[start..end]);
    }
    sections
}

#[derive(Default)]
struct SectionHeader {
    git_old: Option<String>,
    git_new: Option<String>,
    minus: Option<String>,
    plus: Option<String>,
    new_file_mode: bool,
    deleted_file_mode: bool,
}

fn parse_section(section: &[&str]) -> Result<Option<FileChange>, ParseError> {
    let mut header = SectionHeader::default();
    let mut body_start = section.len();

    for (i, line) in section.iter().enumerate() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some((old, new)) = split_git_header(rest) {
                header.git_old = Some(old);
                header.git_new = Some(new);
            }
        } else if line.starts_with("new file mode") {
            header.new_file_mode = true;
        } else if line.starts_with("deleted file mode") {
            header.deleted_file_mode = true;
        } else if is_header_pair(section, i) {
            header.minus = Some(header_path(&line[4..]));
            header.plus = Some(header_path(&section[i + 1][4..]));
            body_start = i + 2;
            break;
        } else if line.starts_with("@@") {
            // Hunks without ---/+++ headers: only usable with a git header.
            body_start = i;
            break;
        }
    }

    let is_new = header.new_file_mode || header.minus.as_deref() == Some(DEV_NULL);
    let is_deleted = header.deleted_file_mode || header.plus.as_deref() == Some(DEV_NULL);

    let path = [
        header.plus.as_deref(),
        header.git_new.as_deref(),
        header.minus.as_deref(),
        header.git_old.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|p| *p != DEV_NULL && !p.is_empty())
    .map(str::to_string);

    let Some(path) = path else {
        debug!("Skipping diff section without a usable path");
        return Ok(None);
    };
    check_path(&path)?;

    let body = &section[body_start.min(section.len())..];

    if is_deleted {
        return Ok(Some(FileChange::Delete { path }));
    }

    if is_new {
        return Ok(Some(FileChange::Create {
            content: collect_new_content(body),
            path,
        }));
    }

    let (hunks, new_eof_newline) = parse_hunks(&path, body);
    if hunks.is_empty() {
        // Mode-only or binary sections carry nothing we can apply.
        debug!(path = %path, "Skipping diff section without hunks");
        return Ok(None);
    }

    Ok(Some(FileChange::Modify {
        path,
        hunks,
        new_eof_newline,
    }))
}

/// Every `+` line after the `+++` marker is the new file's content.
fn collect_new_content(body: &[&str]) -> String {
    let mut lines = Vec::new();
    let mut eof_newline = true;

    for line in body {
        if *line == NO_NEWLINE_MARKER {
            eof_newline = false;
        } else if let Some(added) = line.strip_prefix('+') {
            lines.push(added);
        }
    }

    if lines.is_empty() {
        return String::new();
    }
    let mut content = lines.join("\n");
    if eof_newline {
        content.push('\n');
    }
    content
}

fn parse_hunks(path: &str, body: &[&str]) -> (Vec<Hunk>, Option<bool>) {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut skipping = false;
    let mut new_eof_newline = None;

    for line in body {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            match parse_hunk_header(line) {
                Some(hunk) => {
                    current = Some(hunk);
                    skipping = false;
                }
                None => {
                    warn!(path = %path, header = %line, "Skipping malformed hunk header");
                    skipping = true;
                }
            }
            continue;
        }

        if skipping {
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            continue;
        };

        if *line == NO_NEWLINE_MARKER {
            match hunk.ops.last() {
                Some(LineOp::Add(_)) | Some(LineOp::Context(_)) => new_eof_newline = Some(false),
                _ => {}
            }
        } else if let Some(rest) = line.strip_prefix('+') {
            hunk.ops.push(LineOp::Add(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix('-') {
            hunk.ops.push(LineOp::Remove(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            hunk.ops.push(LineOp::Context(rest.to_string()));
        } else if line.is_empty() {
            // Some generators drop the leading space of blank context lines.
            hunk.ops.push(LineOp::Context(String::new()));
        }
    }

    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }

    (hunks, new_eof_newline)
}

fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let caps = HUNK_HEADER.captures(line)?;
    let num = |i: usize, default: usize| -> Option<usize> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    let hunk = Hunk {
        old_start: num(1, 0)?,
        old_lines: num(2, 1)?,
        new_start: num(3, 0)?,
        new_lines: num(4, 1)?,
        ops: Vec::new(),
    };
    // Ranges that cannot be addressed are malformed.
    hunk.old_start.checked_add(hunk.old_lines)?;
    hunk.new_start.checked_add(hunk.new_lines)?;
    Some(hunk)
}

/// Split the remainder of `diff --git a/x b/y` into (x, y).
fn split_git_header(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    // Quoted paths: "a/x y" "b/x y"
    if rest.starts_with('"') {
        let parts: Vec<&str> = rest.split('"').filter(|s| !s.trim().is_empty()).collect();
        if parts.len() == 2 {
            return Some((strip_side_prefix(parts[0]), strip_side_prefix(parts[1])));
        }
        return None;
    }

    let idx = rest.find(" b/")?;
    let old = &rest[..idx];
    let new = &rest[idx + 1..];
    Some((strip_side_prefix(old), strip_side_prefix(new)))
}

/// Path from the text after `--- ` or `+++ `.
fn header_path(raw: &str) -> String {
    let raw = raw.split('\t').next().unwrap_or("").trim();
    let raw = raw.trim_matches('"');
    if raw == DEV_NULL {
        return DEV_NULL.to_string();
    }
    strip_side_prefix(raw)
}

fn strip_side_prefix(path: &str) -> String {
    let path = path.trim().trim_matches('"');
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}

/// Reject paths that would escape the working tree.
pub fn check_path(path: &str) -> Result<(), ParseError> {
    let unsafe_path = |reason: &'static str| ParseError::UnsafePath {
        path: path.to_string(),
        reason,
    };

    if path.starts_with('/') || path.starts_with('\\') {
        return Err(unsafe_path("absolute path"));
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(unsafe_path("absolute path"));
    }
    if path.split(['/', '\\']).any(|c| c == "..") {
        return Err(unsafe_path("parent directory traversal"));
    }
    if path.contains('\0') {
        return Err(unsafe_path("NUL byte"));
    }
    Ok(())
}
