//! Configuration for patchwarden.
//!
//! Settings are layered: `.patchwarden/warden.toml`, then `PATCHWARDEN_*`
//! environment variables, then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [validation]
//! min_score = 80
//! syntax_command = "tsc --noEmit {file}"
//! syntax_timeout_secs = 60
//!
//! [[validation.security_rules]]
//! pattern = "localStorage\\.setItem"
//! severity = "medium"
//! message = "Token stored in localStorage"
//!
//! [execution]
//! max_executions_per_hour = 5
//! window_secs = 3600
//! attempt_timeout_secs = 300
//! backup_dir = ".patchwarden/backups"
//!
//! [paths]
//! allowed = ["src/**"]
//! denied = [".git/**", ".patchwarden/**"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::orchestrator::OrchestratorConfig;
use crate::validate::policy::{DEFAULT_DENIED, PathPolicy};
use crate::validate::rules::RuleSpec;
use crate::validate::{DEFAULT_MIN_SCORE, ValidatorSettings};

/// Project state directory, relative to the project root.
pub const WARDEN_DIR: &str = ".patchwarden";
pub const CONFIG_FILE: &str = "warden.toml";

pub const ENV_MIN_SCORE: &str = "PATCHWARDEN_MIN_VALIDATION_SCORE";
pub const ENV_MAX_EXECUTIONS: &str = "PATCHWARDEN_MAX_EXECUTIONS_PER_HOUR";
pub const ENV_BACKUP_DIR: &str = "PATCHWARDEN_BACKUP_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_score")]
    pub min_score: u32,
    /// External checker run per added file; `{file}` is replaced with a
    /// scratch copy of the added code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax_command: Option<String>,
    #[serde(default = "default_syntax_timeout_secs")]
    pub syntax_timeout_secs: u64,
    /// Appended to the built-in security table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_rules: Vec<RuleSpec>,
}

fn default_min_score() -> u32 {
    DEFAULT_MIN_SCORE
}

fn default_syntax_timeout_secs() -> u64 {
    60
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            syntax_command: None,
            syntax_timeout_secs: default_syntax_timeout_secs(),
            security_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_executions_per_hour")]
    pub max_executions_per_hour: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Relative paths resolve against the project root.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
    /// Validate as part of `submit`.
    #[serde(default = "default_auto_validate")]
    pub auto_validate: bool,
    /// Actor recorded in the audit trail for operator verbs.
    #[serde(default = "default_operator")]
    pub operator: String,
}

fn default_max_executions_per_hour() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    3600
}

fn default_attempt_timeout_secs() -> u64 {
    300
}

fn default_backup_dir() -> String {
    format!("{}/backups", WARDEN_DIR)
}

fn default_auto_validate() -> bool {
    true
}

fn default_operator() -> String {
    "operator".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_executions_per_hour: default_max_executions_per_hour(),
            window_secs: default_window_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            backup_dir: default_backup_dir(),
            auto_validate: default_auto_validate(),
            operator: default_operator(),
        }
    }
}

/// Glob patterns checked against every affected path. An empty allow-list
/// allows everything; a denied match always wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default = "default_denied")]
    pub denied: Vec<String>,
}

fn default_denied() -> Vec<String> {
    DEFAULT_DENIED.iter().map(|p| p.to_string()).collect()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            denied: default_denied(),
        }
    }
}

/// Contents of `warden.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenToml {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl WardenToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse warden.toml")
    }

    /// Load `<warden_dir>/warden.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(warden_dir: &Path) -> Result<Self> {
        let config_path = warden_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize warden.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `PATCHWARDEN_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are logged and
    /// ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_MIN_SCORE) {
            match raw.trim().parse() {
                Ok(score) => self.validation.min_score = score,
                Err(_) => warn!(var = ENV_MIN_SCORE, value = %raw, "Ignoring non-numeric override"),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_EXECUTIONS) {
            match raw.trim().parse() {
                Ok(max) => self.execution.max_executions_per_hour = max,
                Err(_) => warn!(var = ENV_MAX_EXECUTIONS, value = %raw, "Ignoring non-numeric override"),
            }
        }
        if let Some(raw) = lookup(ENV_BACKUP_DIR)
            && !raw.trim().is_empty()
        {
            self.execution.backup_dir = raw.trim().to_string();
        }
    }

    /// Return human-readable warnings for settings that will not behave as
    /// written.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.validation.min_score > 100 {
            warnings.push(format!(
                "validation.min_score {} is above 100; no patch can pass",
                self.validation.min_score
            ));
        }
        if let Some(cmd) = &self.validation.syntax_command
            && !cmd.contains("{file}")
        {
            warnings.push(format!(
                "validation.syntax_command '{}' has no {{file}} placeholder",
                cmd
            ));
        }
        for (i, rule) in self.validation.security_rules.iter().enumerate() {
            if let Err(e) = rule.compile() {
                warnings.push(format!(
                    "validation.security_rules[{}] has an invalid pattern '{}': {}",
                    i, rule.pattern, e
                ));
            }
        }

        if self.execution.max_executions_per_hour == 0 {
            warnings.push(
                "execution.max_executions_per_hour is 0; every execution will be deferred"
                    .to_string(),
            );
        }
        if self.execution.window_secs == 0 {
            warnings.push("execution.window_secs is 0; the rate limit has no effect".to_string());
        }
        if self.execution.attempt_timeout_secs == 0 {
            warnings.push(
                "execution.attempt_timeout_secs is 0; every attempt will time out".to_string(),
            );
        }

        for pattern in self.paths.allowed.iter().chain(&self.paths.denied) {
            if let Err(e) = glob::Pattern::new(pattern) {
                warnings.push(format!("Invalid path glob '{}': {}", pattern, e));
            }
        }

        warnings
    }

    /// Build validator settings. Security rules that don't compile are
    /// skipped (and reported by [`validate`](Self::validate)); an invalid
    /// path glob is an error, since ignoring it could widen what is allowed.
    pub fn validator_settings(&self, warden_dir: &Path) -> Result<ValidatorSettings> {
        let path_policy = PathPolicy::new(&self.paths.allowed, &self.paths.denied)
            .context("Invalid glob in [paths]")?;
        let extra_security_rules = self
            .validation
            .security_rules
            .iter()
            .filter_map(|spec| match spec.compile() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(pattern = %spec.pattern, error = %e, "Skipping invalid security rule");
                    None
                }
            })
            .collect();

        Ok(ValidatorSettings {
            min_score: self.validation.min_score,
            syntax_command: self.validation.syntax_command.clone(),
            syntax_timeout_secs: self.validation.syntax_timeout_secs,
            extra_security_rules,
            path_policy,
            scratch_dir: Some(warden_dir.join("scratch")),
        })
    }
}

/// Starter `warden.toml` written by `patchwarden init`.
pub fn default_toml() -> String {
    format!(
        r#"# patchwarden configuration

[validation]
# Minimum weighted score (0-100) a patch needs to be approved.
min_score = {min_score}
# Optional external syntax checker; {{file}} is replaced with a scratch file.
# syntax_command = "node --check {{file}}"
syntax_timeout_secs = {syntax_timeout}

# Extra security rules, appended to the built-in table.
# [[validation.security_rules]]
# pattern = "localStorage\\.setItem"
# severity = "medium"
# message = "Sensitive value written to localStorage"

[execution]
max_executions_per_hour = {max_exec}
window_secs = {window}
attempt_timeout_secs = {timeout}
backup_dir = "{backup_dir}"
auto_validate = true
operator = "operator"

[paths]
allowed = []
denied = [".git/**", "{warden}/**"]
"#,
        min_score = DEFAULT_MIN_SCORE,
        syntax_timeout = default_syntax_timeout_secs(),
        max_exec = default_max_executions_per_hour(),
        window = default_window_secs(),
        timeout = default_attempt_timeout_secs(),
        backup_dir = default_backup_dir(),
        warden = WARDEN_DIR,
    )
}

/// Resolved runtime configuration for one project.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    pub project_dir: PathBuf,
    pub verbose: bool,
    pub toml: WardenToml,
}

impl WardenConfig {
    /// Resolve `project_dir`, load `warden.toml` and apply environment
    /// overrides.
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {}", project_dir.display()))?;
        let mut toml = WardenToml::load_or_default(&project_dir.join(WARDEN_DIR))?;
        toml.apply_env();
        Ok(Self {
            project_dir,
            verbose,
            toml,
        })
    }

    pub fn warden_dir(&self) -> PathBuf {
        self.project_dir.join(WARDEN_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.warden_dir().join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.warden_dir().join("patches.db")
    }

    /// Cross-process lock for mutating verbs.
    pub fn lock_path(&self) -> PathBuf {
        self.warden_dir().join("execute.lock")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.warden_dir().join("logs")
    }

    pub fn backup_dir(&self) -> PathBuf {
        let dir = Path::new(&self.toml.execution.backup_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.project_dir.join(dir)
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let exec = &self.toml.execution;
        Ok(OrchestratorConfig {
            work_dir: self.project_dir.clone(),
            backup_dir: self.backup_dir(),
            max_executions_per_hour: exec.max_executions_per_hour,
            window: Duration::from_secs(exec.window_secs),
            attempt_timeout: Duration::from_secs(exec.attempt_timeout_secs),
            auto_validate: exec.auto_validate,
            operator: exec.operator.clone(),
            validator: self.toml.validator_settings(&self.warden_dir())?,
        })
    }
}
