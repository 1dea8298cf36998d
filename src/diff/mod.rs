//! Unified diff model.
//!
//! A diff is parsed into one [`FileChange`] per file section. Modified files
//! carry their hunks; new files carry their full content; deleted files carry
//! only their path. Parsing lives in [`parser`].

pub mod parser;

pub use parser::{affected_files, parse};

use serde::{Deserialize, Serialize};

/// Sentinel path used by unified diffs for "no file on this side".
pub const DEV_NULL: &str = "/dev/null";

/// A single line operation inside a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "text", rename_all = "lowercase")]
pub enum LineOp {
    Context(String),
    Add(String),
    Remove(String),
}

impl LineOp {
    pub fn text(&self) -> &str {
        match self {
            LineOp::Context(s) | LineOp::Add(s) | LineOp::Remove(s) => s,
        }
    }

    /// Whether applying this op consumes a line of the original file.
    pub fn consumes_original(&self) -> bool {
        matches!(self, LineOp::Context(_) | LineOp::Remove(_))
    }

    /// Whether applying this op emits a line into the new file.
    pub fn emits_new(&self) -> bool {
        matches!(self, LineOp::Context(_) | LineOp::Add(_))
    }
}

/// A hunk headed by `@@ -old_start,old_lines +new_start,new_lines @@`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub ops: Vec<LineOp>,
}

impl Hunk {
    /// (additions, deletions) in this hunk.
    pub fn stats(&self) -> (usize, usize) {
        self.ops.iter().fold((0, 0), |(a, r), op| match op {
            LineOp::Add(_) => (a + 1, r),
            LineOp::Remove(_) => (a, r + 1),
            LineOp::Context(_) => (a, r),
        })
    }

    /// Number of original lines this hunk actually consumes.
    pub fn consumed(&self) -> usize {
        self.ops.iter().filter(|op| op.consumes_original()).count()
    }

    /// Number of new lines this hunk actually emits.
    pub fn emitted(&self) -> usize {
        self.ops.iter().filter(|op| op.emits_new()).count()
    }
}

/// One file section of a parsed diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileChange {
    /// A new file; `content` is the exact text the diff asserts.
    Create { path: String, content: String },
    /// An existing file changed by hunks.
    Modify {
        path: String,
        hunks: Vec<Hunk>,
        /// `Some(false)` when the diff marks the new side with
        /// `\ No newline at end of file`.
        new_eof_newline: Option<bool>,
    },
    /// A file removed by the diff.
    Delete { path: String },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Create { path, .. }
            | FileChange::Modify { path, .. }
            | FileChange::Delete { path } => path,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            FileChange::Create { .. } => ChangeKind::Create,
            FileChange::Modify { .. } => ChangeKind::Modify,
            FileChange::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Lines this change adds to the codebase.
    ///
    /// For a new file this is its whole content; for a modification only
    /// the `+` lines of its hunks; a deletion adds nothing.
    pub fn added_lines(&self) -> Vec<&str> {
        match self {
            FileChange::Create { content, .. } => content.lines().collect(),
            FileChange::Modify { hunks, .. } => hunks
                .iter()
                .flat_map(|h| h.ops.iter())
                .filter_map(|op| match op {
                    LineOp::Add(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect(),
            FileChange::Delete { .. } => Vec::new(),
        }
    }

    /// (additions, deletions) for this file.
    pub fn stats(&self) -> (usize, usize) {
        match self {
            FileChange::Create { content, .. } => (content.lines().count(), 0),
            FileChange::Modify { hunks, .. } => hunks.iter().fold((0, 0), |acc, h| {
                let (a, r) = h.stats();
                (acc.0 + a, acc.1 + r)
            }),
            FileChange::Delete { .. } => (0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Modify => write!(f, "modify"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// Total (additions, deletions) over a set of changes.
pub fn total_stats(changes: &[FileChange]) -> (usize, usize) {
    changes.iter().fold((0, 0), |acc, c| {
        let (a, r) = c.stats();
        (acc.0 + a, acc.1 + r)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_lines_per_kind() {
        let create = FileChange::Create {
            path: "a.ts".into(),
            content: "one\ntwo\n".into(),
        };
        assert_eq!(create.added_lines(), vec!["one", "two"]);

        let modify = FileChange::Modify {
            path: "b.ts".into(),
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 2,
                new_start: 1,
                new_lines: 2,
                ops: vec![
                    LineOp::Context("keep".into()),
                    LineOp::Remove("old".into()),
                    LineOp::Add("new".into()),
                ],
            }],
            new_eof_newline: None,
        };
        assert_eq!(modify.added_lines(), vec!["new"]);
        assert_eq!(modify.stats(), (1, 1));

        let delete = FileChange::Delete { path: "c.ts".into() };
        assert!(delete.added_lines().is_empty());
    }

    #[test]
    fn test_hunk_consumed_and_emitted() {
        let hunk = Hunk {
            old_start: 3,
            old_lines: 3,
            new_start: 3,
            new_lines: 2,
            ops: vec![
                LineOp::Context("a".into()),
                LineOp::Remove("b".into()),
                LineOp::Remove("c".into()),
                LineOp::Add("d".into()),
            ],
        };
        assert_eq!(hunk.consumed(), 3);
        assert_eq!(hunk.emitted(), 2);
    }
}
