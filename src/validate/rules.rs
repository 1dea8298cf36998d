//! Rule tables shared by the heuristic gates.
//!
//! A rule is a regex, a severity and a message. Gates walk the table; adding
//! a check means adding a row, not touching control flow. These rules flag
//! risk, they do not prove anything about the code.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How bad a rule match is.
///
/// `Critical` and `High` block a patch; `Medium` and `Low` are reported as
/// warnings only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Source language, inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Go,
    Unknown,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            _ => Language::Unknown,
        }
    }

    pub fn is_js_family(&self) -> bool {
        matches!(
            self,
            Language::JavaScript | Language::TypeScript | Language::Tsx
        )
    }

    pub fn is_typescript(&self) -> bool {
        matches!(self, Language::TypeScript | Language::Tsx)
    }
}

/// One row of a rule table.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub regex: Regex,
    pub severity: Severity,
    pub message: String,
}

impl PatternRule {
    pub fn new(pattern: &str, severity: Severity, message: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            severity,
            message: message.into(),
        })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

/// A rule as written in `warden.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    pub severity: Severity,
    pub message: String,
}

impl RuleSpec {
    pub fn compile(&self) -> Result<PatternRule, regex::Error> {
        PatternRule::new(&self.pattern, self.severity, self.message.clone())
    }
}

/// Build a table from static rows. The rows are literals, so a bad pattern is
/// a programming error caught by this module's tests; it is dropped rather
/// than panicking at runtime.
pub(crate) fn table(rows: &[(&str, Severity, &str)]) -> Vec<PatternRule> {
    rows.iter()
        .filter_map(|(pattern, severity, message)| PatternRule::new(pattern, *severity, *message).ok())
        .collect()
}
