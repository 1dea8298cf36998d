//! Allowed/denied path globs.

use glob::{MatchOptions, Pattern, PatternError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Never writable by a patch unless configuration says otherwise.
pub const DEFAULT_DENIED: &[&str] = &[".git/**", ".patchwarden/**"];

/// Which paths a patch may touch. An empty allow-list allows everything;
/// the deny-list always wins.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    allowed: Vec<Pattern>,
    denied: Vec<Pattern>,
}

impl PathPolicy {
    pub fn new<S: AsRef<str>>(allowed: &[S], denied: &[S]) -> Result<Self, PatternError> {
        Ok(Self {
            allowed: compile(allowed)?,
            denied: compile(denied)?,
        })
    }

    /// Everything allowed except [`DEFAULT_DENIED`].
    pub fn protected() -> Self {
        Self::new(&[] as &[&str], DEFAULT_DENIED).unwrap_or_default()
    }

    /// Why `path` is not permitted, if it isn't.
    pub fn check(&self, path: &str) -> Option<String> {
        if let Some(p) = self.denied.iter().find(|p| p.matches_with(path, MATCH_OPTIONS)) {
            return Some(format!("{}: matches denied pattern '{}'", path, p.as_str()));
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(|p| p.matches_with(path, MATCH_OPTIONS)) {
            return Some(format!("{}: not covered by any allowed pattern", path));
        }
        None
    }

    pub fn violations(&self, paths: &[String]) -> Vec<String> {
        paths.iter().filter_map(|p| self.check(p)).collect()
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>, PatternError> {
    patterns.iter().map(|p| Pattern::new(p.as_ref())).collect()
}
