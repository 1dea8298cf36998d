//! CLI command implementations.
//!
//! | Module    | Commands handled                                            |
//! |-----------|-------------------------------------------------------------|
//! | `project` | `Init`                                                      |
//! | `patch`   | `Submit`, `Approve`, `Reject`, `Execute`, `Rollback`, `Show`, `List` |
//! | `audit`   | `Audit`                                                     |
//! | `config`  | `Config`                                                    |

pub mod audit;
pub mod config;
pub mod patch;
pub mod project;

pub use audit::cmd_audit;
pub use config::cmd_config;
pub use patch::{cmd_approve, cmd_execute, cmd_list, cmd_reject, cmd_rollback, cmd_show, cmd_submit};
pub use project::cmd_init;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use patchwarden::config::WardenConfig;
use patchwarden::orchestrator::Orchestrator;
use patchwarden::store::SqliteStore;

use super::Cli;

/// Load configuration, print any warnings, and open the store.
pub(crate) fn open_orchestrator(project_dir: &Path, cli: &Cli) -> Result<(WardenConfig, Orchestrator)> {
    if !patchwarden::init::is_initialized(project_dir) {
        anyhow::bail!(
            "{} is not a patchwarden project. Run 'patchwarden init' first.",
            project_dir.display()
        );
    }
    let config = WardenConfig::new(project_dir.to_path_buf(), cli.verbose)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let store = SqliteStore::open(&config.db_path())
        .with_context(|| format!("Failed to open {}", config.db_path().display()))?;
    let orchestrator = Orchestrator::new(config.orchestrator_config()?, Arc::new(store))?;
    Ok((config, orchestrator))
}
