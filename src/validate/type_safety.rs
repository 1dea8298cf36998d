//! Type-safety gate.
//!
//! A pattern scan, not a type checker: it flags escape-hatch types,
//! suppressed checks, untyped parameters and missing return annotations in
//! TypeScript and Python. Every hit is a warning. The gate only passes when
//! there are none, which costs the patch 30 points but never blocks it on
//! its own.

use super::rules::{Language, PatternRule, Severity, table};
use super::{AddedCode, GateOutcome, finding};

fn typescript_rules() -> Vec<PatternRule> {
    table(&[
        (r":\s*any\b", Severity::Medium, "explicit `any` type"),
        (r"\bas\s+any\b", Severity::Medium, "cast to `any`"),
        (r"<any>", Severity::Medium, "angle-bracket cast to `any`"),
        (r"@ts-(ignore|nocheck)\b", Severity::Medium, "type checking suppressed"),
        (
            r"\bfunction\b[\s\w$]*\(\s*[A-Za-z_$][\w$]*\s*[,)]",
            Severity::Low,
            "untyped function parameter",
        ),
        (
            r"\(\s*[A-Za-z_$][\w$]*\s*[,)]\s*=>",
            Severity::Low,
            "untyped arrow function parameter",
        ),
        (
            r"\bfunction\s+[A-Za-z_$][\w$]*\s*(<[^>]*>)?\s*\([^)]*\)\s*\{",
            Severity::Low,
            "function without return type annotation",
        ),
    ])
}

fn python_rules() -> Vec<PatternRule> {
    table(&[
        (
            r"^\s*(async\s+)?def\s+\w+\s*\([^)]*\)\s*:",
            Severity::Low,
            "function without return type annotation",
        ),
        (r"(:|->)\s*(typing\.)?Any\b", Severity::Medium, "explicit `Any` type"),
        (r"#\s*type:\s*ignore", Severity::Medium, "type checking suppressed"),
        (r"\bcast\(\s*(typing\.)?Any\b", Severity::Medium, "cast to `Any`"),
    ])
}

pub struct TypeSafetyGate {
    typescript: Vec<PatternRule>,
    python: Vec<PatternRule>,
}

impl Default for TypeSafetyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeSafetyGate {
    pub fn new() -> Self {
        Self {
            typescript: typescript_rules(),
            python: python_rules(),
        }
    }

    fn rules_for(&self, language: Language) -> &[PatternRule] {
        match language {
            Language::TypeScript | Language::Tsx => &self.typescript,
            Language::Python => &self.python,
            _ => &[],
        }
    }

    pub fn check(&self, units: &[AddedCode]) -> GateOutcome {
        let mut warnings = Vec::new();
        for unit in units {
            let rules = self.rules_for(unit.language);
            for line in &unit.lines {
                for rule in rules.iter().filter(|r| r.is_match(&line.text)) {
                    warnings.push(finding(&unit.path, line.number, &rule.message));
                }
            }
        }
        GateOutcome {
            passed: warnings.is_empty(),
            errors: Vec::new(),
            warnings,
        }
    }
}
