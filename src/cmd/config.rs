//! Configuration view and validation commands — `patchwarden config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use patchwarden::config::{CONFIG_FILE, WARDEN_DIR, WardenConfig, WardenToml, default_toml};

    let warden_dir = project_dir.join(WARDEN_DIR);
    let config_path = warden_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("patchwarden Configuration");
            println!("=========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No warden.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            // Effective values include PATCHWARDEN_* overrides
            let toml = if project_dir.exists() {
                WardenConfig::new(project_dir.to_path_buf(), false)?.toml
            } else {
                WardenToml::default()
            };

            println!("[validation]");
            println!("  min_score = {}", toml.validation.min_score);
            match &toml.validation.syntax_command {
                Some(cmd) => println!("  syntax_command = \"{}\"", cmd),
                None => println!("  syntax_command = (tree-sitter only)"),
            }
            println!("  syntax_timeout_secs = {}", toml.validation.syntax_timeout_secs);
            for rule in &toml.validation.security_rules {
                println!(
                    "  security rule: /{}/ ({}) {}",
                    rule.pattern, rule.severity, rule.message
                );
            }
            println!();

            println!("[execution]");
            println!(
                "  max_executions_per_hour = {}",
                toml.execution.max_executions_per_hour
            );
            println!("  window_secs = {}", toml.execution.window_secs);
            println!("  attempt_timeout_secs = {}", toml.execution.attempt_timeout_secs);
            println!("  backup_dir = \"{}\"", toml.execution.backup_dir);
            println!("  auto_validate = {}", toml.execution.auto_validate);
            println!("  operator = \"{}\"", toml.execution.operator);
            println!();

            println!("[paths]");
            println!("  allowed = {:?}", toml.paths.allowed);
            println!("  denied = {:?}", toml.paths.denied);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No warden.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = WardenToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("warden.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&warden_dir)?;
            std::fs::write(&config_path, default_toml())?;

            println!("Created warden.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [validation] min_score, syntax_command, security_rules");
            println!("  - [execution] rate limit, attempt timeout, backup_dir");
            println!("  - [paths] allowed / denied globs");
            println!();
        }
    }

    Ok(())
}
