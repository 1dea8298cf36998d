//! `patchwarden init`: create the project state directory.
//!
//! ```text
//! .patchwarden/
//! ├── warden.toml      # Configuration (defaults written on first init)
//! ├── patches.db       # Patch store (created on first use)
//! ├── backups/         # One directory per execution attempt
//! ├── logs/            # Daily JSON logs
//! └── scratch/         # Temp files for the external syntax checker
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, WARDEN_DIR, default_toml};

const SUBDIRS: &[&str] = &["backups", "logs", "scratch"];

#[derive(Debug)]
pub struct InitResult {
    pub warden_dir: PathBuf,
    /// False if the directory already existed.
    pub created: bool,
    /// Whether `warden.toml` was written by this call.
    pub wrote_config: bool,
}

/// Initialize `project_dir`. Safe to re-run: missing pieces are added,
/// existing files are never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let warden_dir = project_dir.join(WARDEN_DIR);
    let created = !warden_dir.exists();

    std::fs::create_dir_all(&warden_dir)
        .with_context(|| format!("Failed to create directory: {}", warden_dir.display()))?;
    for sub in SUBDIRS {
        let dir = warden_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_path = warden_dir.join(CONFIG_FILE);
    let wrote_config = !config_path.exists();
    if wrote_config {
        std::fs::write(&config_path, default_toml())
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    Ok(InitResult {
        warden_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(WARDEN_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_structure() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.warden_dir, dir.path().join(".patchwarden"));
        for sub in SUBDIRS {
            assert!(result.warden_dir.join(sub).is_dir(), "{}", sub);
        }
        assert!(result.warden_dir.join("warden.toml").is_file());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_reinit_keeps_existing_config() {
        let dir = tempdir().unwrap();
        let warden_dir = dir.path().join(".patchwarden");
        std::fs::create_dir_all(&warden_dir).unwrap();
        std::fs::write(warden_dir.join("warden.toml"), "[validation]\nmin_score = 95\n").unwrap();

        let result = init_project(dir.path()).unwrap();
        assert!(!result.created);
        assert!(!result.wrote_config);
        assert!(warden_dir.join("backups").is_dir());
        let content = std::fs::read_to_string(warden_dir.join("warden.toml")).unwrap();
        assert!(content.contains("min_score = 95"));
    }

    #[test]
    fn test_is_initialized_false_for_new_project() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
    }
}
