//! Validator pipeline.
//!
//! Four independent gates run over the code a patch adds:
//!
//! | Gate        | Weight | Blocks on                                   |
//! |-------------|--------|---------------------------------------------|
//! | syntax      | 30     | parser errors in the added unit             |
//! | type-safety | 30     | never (warnings only, gate fails on any)    |
//! | dependency  | 20     | imports that resolve to nothing             |
//! | security    | 20     | critical/high rule matches                  |
//!
//! Every gate always runs so a [`ValidationResult`] reports the full picture.
//! A path-policy check adds errors for paths outside the configured globs
//! without affecting the score.

pub mod dependency;
pub mod policy;
pub mod rules;
pub mod security;
pub mod syntax;
pub mod type_safety;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::{FileChange, LineOp};
use dependency::DependencyGate;
use policy::PathPolicy;
use rules::{Language, PatternRule};
use security::SecurityGate;
use syntax::SyntaxGate;
use type_safety::TypeSafetyGate;

pub const SYNTAX_WEIGHT: u32 = 30;
pub const TYPE_SAFETY_WEIGHT: u32 = 30;
pub const DEPENDENCY_WEIGHT: u32 = 20;
pub const SECURITY_WEIGHT: u32 = 20;

pub const DEFAULT_MIN_SCORE: u32 = 80;

/// Result of one gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl GateOutcome {
    /// Passed iff no errors were recorded.
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            passed: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub syntax_passed: bool,
    pub type_safety_passed: bool,
    pub dependency_passed: bool,
    pub security_passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub score: u32,
    pub min_score: u32,
    pub passed: bool,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    /// Combine gate outcomes into the weighted score and overall verdict.
    pub fn combine(
        syntax: GateOutcome,
        type_safety: GateOutcome,
        dependency: GateOutcome,
        security: GateOutcome,
        policy_errors: Vec<String>,
        min_score: u32,
    ) -> Self {
        let score = weight(syntax.passed, SYNTAX_WEIGHT)
            + weight(type_safety.passed, TYPE_SAFETY_WEIGHT)
            + weight(dependency.passed, DEPENDENCY_WEIGHT)
            + weight(security.passed, SECURITY_WEIGHT);

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for (name, gate) in [
            ("syntax", &syntax),
            ("type-safety", &type_safety),
            ("dependency", &dependency),
            ("security", &security),
        ] {
            errors.extend(gate.errors.iter().map(|e| format!("[{}] {}", name, e)));
            warnings.extend(gate.warnings.iter().map(|w| format!("[{}] {}", name, w)));
        }
        errors.extend(policy_errors.into_iter().map(|e| format!("[paths] {}", e)));

        let passed = score >= min_score && errors.is_empty();
        Self {
            syntax_passed: syntax.passed,
            type_safety_passed: type_safety.passed,
            dependency_passed: dependency.passed,
            security_passed: security.passed,
            errors,
            warnings,
            score,
            min_score,
            passed,
            validated_at: Utc::now(),
        }
    }

    /// Failed only on heuristics: no errors, just a score under the bar.
    pub fn is_soft_failure(&self) -> bool {
        !self.passed && self.errors.is_empty()
    }
}

fn weight(passed: bool, w: u32) -> u32 {
    if passed { w } else { 0 }
}

/// One added line with its line number in the new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedLine {
    pub number: usize,
    pub text: String,
}

/// The code one file change adds, as the gates see it.
#[derive(Debug, Clone)]
pub struct AddedCode {
    pub path: String,
    pub language: Language,
    pub lines: Vec<AddedLine>,
    pub is_new_file: bool,
}

impl AddedCode {
    /// `None` for deletions, which add nothing.
    pub fn from_change(change: &FileChange) -> Option<Self> {
        let lines = match change {
            FileChange::Delete { .. } => return None,
            FileChange::Create { content, .. } => content
                .lines()
                .enumerate()
                .map(|(i, text)| AddedLine {
                    number: i + 1,
                    text: text.to_string(),
                })
                .collect(),
            FileChange::Modify { hunks, .. } => {
                let mut lines = Vec::new();
                for hunk in hunks {
                    let mut number = hunk.new_start.max(1);
                    for op in &hunk.ops {
                        match op {
                            LineOp::Add(text) => {
                                lines.push(AddedLine {
                                    number,
                                    text: text.clone(),
                                });
                                number = number.saturating_add(1);
                            }
                            LineOp::Context(_) => number = number.saturating_add(1),
                            LineOp::Remove(_) => {}
                        }
                    }
                }
                lines
            }
        };
        Some(Self {
            path: change.path().to_string(),
            language: Language::from_path(change.path()),
            lines,
            is_new_file: matches!(change, FileChange::Create { .. }),
        })
    }

    /// The added lines joined into a standalone unit.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }

    /// New-file line number of the unit's `row` (0-based).
    pub fn line_number(&self, row: usize) -> usize {
        self.lines
            .get(row)
            .or_else(|| self.lines.last())
            .map(|l| l.number)
            .unwrap_or(1)
    }
}

/// Format a finding as `path:line: message`.
pub(crate) fn finding(path: &str, line: usize, message: &str) -> String {
    format!("{}:{}: {}", path, line, message)
}

/// Knobs the pipeline is built from; usually derived from `warden.toml`.
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    pub min_score: u32,
    pub syntax_command: Option<String>,
    pub syntax_timeout_secs: u64,
    pub extra_security_rules: Vec<PatternRule>,
    pub path_policy: PathPolicy,
    /// Where scratch files for the external syntax checker go.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            syntax_command: None,
            syntax_timeout_secs: 60,
            extra_security_rules: Vec::new(),
            path_policy: PathPolicy::protected(),
            scratch_dir: None,
        }
    }
}

pub struct Validator {
    min_score: u32,
    syntax: SyntaxGate,
    type_safety: TypeSafetyGate,
    dependency: DependencyGate,
    security: SecurityGate,
    policy: PathPolicy,
}

impl Validator {
    pub fn new(work_dir: impl AsRef<Path>, settings: ValidatorSettings) -> Self {
        let work_dir = work_dir.as_ref();
        let scratch = settings
            .scratch_dir
            .unwrap_or_else(|| work_dir.join(".patchwarden").join("scratch"));
        let syntax = match settings.syntax_command {
            Some(cmd) => SyntaxGate::with_external(cmd, settings.syntax_timeout_secs, scratch),
            None => SyntaxGate::new(),
        };
        Self {
            min_score: settings.min_score,
            syntax,
            type_safety: TypeSafetyGate::new(),
            dependency: DependencyGate::new(work_dir),
            security: SecurityGate::with_extra_rules(settings.extra_security_rules),
            policy: settings.path_policy,
        }
    }

    pub fn min_score(&self) -> u32 {
        self.min_score
    }

    /// Run every gate over `changes`; `affected` feeds the path policy.
    pub async fn validate(&self, changes: &[FileChange], affected: &[String]) -> ValidationResult {
        let units: Vec<AddedCode> = changes.iter().filter_map(AddedCode::from_change).collect();
        let created: Vec<&str> = changes
            .iter()
            .filter(|c| matches!(c, FileChange::Create { .. }))
            .map(|c| c.path())
            .collect();

        let syntax = self.syntax.check(&units).await;
        let type_safety = self.type_safety.check(&units);
        let dependency = self.dependency.check(&units, &created);
        let security = self.security.check(&units);
        let policy_errors = self.policy.violations(affected);

        debug!(
            syntax = syntax.passed,
            type_safety = type_safety.passed,
            dependency = dependency.passed,
            security = security.passed,
            policy_violations = policy_errors.len(),
            "Gate outcomes"
        );

        let result = ValidationResult::combine(
            syntax,
            type_safety,
            dependency,
            security,
            policy_errors,
            self.min_score,
        );
        info!(
            score = result.score,
            passed = result.passed,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validation finished"
        );
        result
    }
}
