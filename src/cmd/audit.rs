//! `patchwarden audit`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use patchwarden::audit::{ExportFormat, export};

use super::super::Cli;
use super::open_orchestrator;
use super::patch::resolve_id;

pub fn cmd_audit(project_dir: &Path, cli: &Cli, id: Option<&str>, output: Option<&Path>) -> Result<()> {
    let (_config, orchestrator) = open_orchestrator(project_dir, cli)?;
    let id = id.map(|id| resolve_id(&orchestrator, id)).transpose()?;
    let id = id.as_deref();
    let entries = orchestrator.audit_trail(id)?;

    if let Some(output) = output {
        let format = ExportFormat::from_path(output);
        let file = std::fs::File::create(output)
            .with_context(|| format!("Failed to create {}", output.display()))?;
        export(&entries, format, std::io::BufWriter::new(file))?;
        println!("Exported {} audit entries to {}", entries.len(), output.display());
        return Ok(());
    }

    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }

    println!();
    let mut current: Option<&str> = None;
    for entry in &entries {
        if id.is_none() && current != Some(entry.patch_id.as_str()) {
            println!("{}", style(&entry.patch_id).bold());
            current = Some(entry.patch_id.as_str());
        }
        println!("  {}", entry.summary());
        if !entry.details.is_null() {
            println!("    {}", style(entry.details.to_string()).dim());
        }
    }
    println!();
    Ok(())
}
