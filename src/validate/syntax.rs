//! Syntax gate.
//!
//! Added lines are parsed as a standalone unit with the tree-sitter grammar
//! for the file's language. `ERROR` nodes fail the gate; `MISSING` nodes
//! (tokens the parser had to invent to recover) are warnings. Files without
//! a grammar pass with a warning.
//!
//! When an external checker command is configured it runs in addition, on a
//! scratch copy of the unit, and a non-zero exit is an error.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread::LocalKey;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Tree};

use super::rules::Language;
use super::{AddedCode, GateOutcome, finding};

/// Cap per file so a badly broken unit doesn't flood the report.
const MAX_FINDINGS_PER_FILE: usize = 5;

/// Build a parser for one grammar. A grammar that fails to load (an ABI
/// mismatch between `tree-sitter` and the grammar crate) is logged and left
/// out; units in that language then fail the gate.
fn load_parser(language: tree_sitter::Language, name: &str) -> Option<Parser> {
    let mut parser = Parser::new();
    match parser.set_language(&language) {
        Ok(()) => Some(parser),
        Err(e) => {
            warn!(grammar = name, error = %e, "Failed to load tree-sitter grammar");
            None
        }
    }
}

thread_local! {
    static RUST_PARSER: RefCell<Option<Parser>> =
        RefCell::new(load_parser(tree_sitter_rust::LANGUAGE.into(), "rust"));
    static JS_PARSER: RefCell<Option<Parser>> =
        RefCell::new(load_parser(tree_sitter_javascript::LANGUAGE.into(), "javascript"));
    static TS_PARSER: RefCell<Option<Parser>> =
        RefCell::new(load_parser(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(), "typescript"));
    static TSX_PARSER: RefCell<Option<Parser>> =
        RefCell::new(load_parser(tree_sitter_typescript::LANGUAGE_TSX.into(), "tsx"));
    static PYTHON_PARSER: RefCell<Option<Parser>> =
        RefCell::new(load_parser(tree_sitter_python::LANGUAGE.into(), "python"));
    static GO_PARSER: RefCell<Option<Parser>> =
        RefCell::new(load_parser(tree_sitter_go::LANGUAGE.into(), "go"));
}

/// Why a unit produced no tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unparsed {
    NoGrammar,
    GrammarFailed,
    GaveUp,
}

fn parse_with(parser: &'static LocalKey<RefCell<Option<Parser>>>, source: &str) -> Result<Tree, Unparsed> {
    parser.with(|p| match p.borrow_mut().as_mut() {
        Some(parser) => parser.parse(source, None).ok_or(Unparsed::GaveUp),
        None => Err(Unparsed::GrammarFailed),
    })
}

/// Parse with the thread-local parser for `language`.
fn parse_unit(source: &str, language: Language) -> Result<Tree, Unparsed> {
    match language {
        Language::Rust => parse_with(&RUST_PARSER, source),
        Language::JavaScript => parse_with(&JS_PARSER, source),
        Language::TypeScript => parse_with(&TS_PARSER, source),
        Language::Tsx => parse_with(&TSX_PARSER, source),
        Language::Python => parse_with(&PYTHON_PARSER, source),
        Language::Go => parse_with(&GO_PARSER, source),
        Language::Unknown => Err(Unparsed::NoGrammar),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Problem {
    Error { row: usize, snippet: String },
    Missing { row: usize, token: String },
}

/// Collect ERROR and MISSING nodes, without descending into ERROR subtrees.
fn problems(tree: &Tree, source: &str) -> Vec<Problem> {
    let mut found = Vec::new();
    let mut stack: Vec<Node> = vec![tree.root_node()];
    let mut cursor = tree.walk();

    while let Some(node) = stack.pop() {
        if node.is_missing() {
            found.push(Problem::Missing {
                row: node.start_position().row,
                token: node.kind().to_string(),
            });
            continue;
        }
        if node.is_error() {
            let snippet = source
                .get(node.byte_range())
                .unwrap_or("")
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .chars()
                .take(40)
                .collect();
            found.push(Problem::Error {
                row: node.start_position().row,
                snippet,
            });
            continue;
        }
        if node.has_error() {
            let children: Vec<Node> = node.children(&mut cursor).collect();
            // Reverse so findings come out in source order.
            stack.extend(children.into_iter().rev());
        }
    }
    found
}

/// Optional external checker, e.g. `tsc --noEmit {file}`.
#[derive(Debug, Clone)]
pub struct ExternalChecker {
    command: String,
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl ExternalChecker {
    async fn run(&self, unit: &AddedCode, source: &str) -> Result<(), String> {
        let ext = Path::new(&unit.path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt");
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| format!("cannot create scratch dir: {}", e))?;
        let scratch = self
            .scratch_dir
            .join(format!("{}.{}", uuid::Uuid::new_v4().simple(), ext));
        tokio::fs::write(&scratch, source)
            .await
            .map_err(|e| format!("cannot write scratch file: {}", e))?;

        let command = self.command.replace("{file}", &scratch.to_string_lossy());
        let result = self.spawn(&command).await;
        let _ = tokio::fs::remove_file(&scratch).await;
        result
    }

    async fn spawn(&self, command: &str) -> Result<(), String> {
        debug!(command, "Running external syntax checker");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn syntax checker: {}", e))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| format!("syntax checker failed: {}", e))?,
            Err(_) => {
                return Err(format!(
                    "syntax checker timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = stderr
            .lines()
            .chain(stdout.lines())
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no output")
            .trim()
            .to_string();
        Err(format!(
            "syntax checker exited with {}: {}",
            output.status.code().unwrap_or(-1),
            detail
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntaxGate {
    external: Option<ExternalChecker>,
}

impl SyntaxGate {
    pub fn new() -> Self {
        Self { external: None }
    }

    pub fn with_external(command: String, timeout_secs: u64, scratch_dir: PathBuf) -> Self {
        Self {
            external: Some(ExternalChecker {
                command,
                timeout: Duration::from_secs(timeout_secs),
                scratch_dir,
            }),
        }
    }

    pub async fn check(&self, units: &[AddedCode]) -> GateOutcome {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for unit in units {
            if unit.lines.is_empty() {
                continue;
            }
            let source = unit.source();
            self.check_tree(unit, &source, &mut errors, &mut warnings);

            if let Some(external) = &self.external
                && unit.language != Language::Unknown
                && let Err(msg) = external.run(unit, &source).await
            {
                warn!(path = %unit.path, error = %msg, "External syntax check failed");
                errors.push(format!("{}: {}", unit.path, msg));
            }
        }

        GateOutcome::from_findings(errors, warnings)
    }

    fn check_tree(
        &self,
        unit: &AddedCode,
        source: &str,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let tree = match parse_unit(source, unit.language) {
            Ok(tree) => tree,
            Err(why) => {
                report_unparsed(unit, why, errors, warnings);
                return;
            }
        };

        for problem in problems(&tree, source).into_iter().take(MAX_FINDINGS_PER_FILE) {
            match problem {
                Problem::Error { row, snippet } => {
                    let msg = if snippet.is_empty() {
                        "syntax error".to_string()
                    } else {
                        format!("syntax error near `{}`", snippet)
                    };
                    errors.push(finding(&unit.path, unit.line_number(row), &msg));
                }
                Problem::Missing { row, token } => {
                    warnings.push(finding(
                        &unit.path,
                        unit.line_number(row),
                        &format!("parser inserted missing `{}`", token),
                    ));
                }
            }
        }
    }
}

/// Only a grammar that failed to load is an error; the rest only mean the
/// unit went unchecked.
fn report_unparsed(unit: &AddedCode, why: Unparsed, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    match why {
        Unparsed::NoGrammar => {
            warnings.push(format!("{}: no grammar for this file type, syntax not checked", unit.path));
        }
        Unparsed::GrammarFailed => {
            errors.push(format!(
                "{}: {:?} grammar failed to load, syntax not checked",
                unit.path, unit.language
            ));
        }
        Unparsed::GaveUp => {
            warnings.push(format!("{}: parser gave up, syntax not checked", unit.path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::AddedLine;

    fn unit(path: &str, lines: &[&str]) -> AddedCode {
        AddedCode {
            path: path.to_string(),
            language: Language::from_path(path),
            lines: lines
                .iter()
                .enumerate()
                .map(|(i, t)| AddedLine {
                    number: i + 1,
                    text: t.to_string(),
                })
                .collect(),
            is_new_file: true,
        }
    }

    #[tokio::test]
    async fn test_valid_units_pass() {
        let gate = SyntaxGate::new();
        let outcome = gate
            .check(&[
                unit("a.ts", &["export const x: number = 1;"]),
                unit("b.py", &["def f(x):", "    return x"]),
                unit("c.rs", &["fn main() {}"]),
                unit("d.go", &["package main", "", "func main() {}"]),
                unit("e.jsx", &["const el = <div>hi</div>;"]),
            ])
            .await;
        assert!(outcome.passed, "{:?}", outcome.errors);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    }

    #[tokio::test]
    async fn test_broken_unit_fails_with_line_number() {
        let gate = SyntaxGate::new();
        let outcome = gate
            .check(&[unit("a.ts", &["const ok = 1;", "function (( {"])])
            .await;
        assert!(!outcome.passed);
        assert!(outcome.errors[0].starts_with("a.ts:"), "{:?}", outcome.errors);
    }

    #[tokio::test]
    async fn test_unknown_language_is_warning_only() {
        let gate = SyntaxGate::new();
        let outcome = gate.check(&[unit("notes.md", &["# title", "((("])]).await;
        assert!(outcome.passed);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_every_grammar_loads() {
        for language in [
            Language::Rust,
            Language::JavaScript,
            Language::TypeScript,
            Language::Tsx,
            Language::Python,
            Language::Go,
        ] {
            assert!(parse_unit("", language).is_ok(), "{:?}", language);
        }
        assert!(matches!(parse_unit("", Language::Unknown), Err(Unparsed::NoGrammar)));
    }

    #[test]
    fn test_grammar_load_failure_is_error() {
        let u = unit("a.ts", &["export const a = 1;"]);
        let (mut errors, mut warnings) = (Vec::new(), Vec::new());
        report_unparsed(&u, Unparsed::GrammarFailed, &mut errors, &mut warnings);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("TypeScript grammar failed to load"));
        assert!(warnings.is_empty());

        report_unparsed(&u, Unparsed::GaveUp, &mut errors, &mut warnings);
        assert_eq!((errors.len(), warnings.len()), (1, 1));
    }

    #[tokio::test]
    async fn test_empty_unit_is_skipped() {
        let gate = SyntaxGate::new();
        let outcome = gate.check(&[unit("a.ts", &[])]).await;
        assert!(outcome.passed);
        assert!(outcome.warnings.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_checker_failure_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let gate = SyntaxGate::with_external(
            "echo 'bad token' >&2; exit 2".into(),
            10,
            dir.path().to_path_buf(),
        );
        let outcome = gate.check(&[unit("a.ts", &["const x = 1;"])]).await;
        assert!(!outcome.passed);
        assert!(outcome.errors[0].contains("bad token"));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_checker_receives_scratch_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let gate = SyntaxGate::with_external(
            "grep -q 'const x' {file}".into(),
            10,
            dir.path().to_path_buf(),
        );
        let outcome = gate.check(&[unit("a.ts", &["const x = 1;"])]).await;
        assert!(outcome.passed, "{:?}", outcome.errors);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_external_checker_timeout_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let gate = SyntaxGate::with_external("sleep 5".into(), 1, dir.path().to_path_buf());
        let outcome = gate.check(&[unit("a.ts", &["const x = 1;"])]).await;
        assert!(!outcome.passed);
        assert!(outcome.errors[0].contains("timed out"));
    }
}
