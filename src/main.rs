use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "patchwarden")]
#[command(version, about = "Validate, apply and roll back machine-generated patches")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .patchwarden directory and a default warden.toml
    Init,
    /// Submit a generated diff for an issue
    Submit {
        /// Issue descriptor (JSON file)
        #[arg(long)]
        issue: PathBuf,
        /// Unified diff, or generator output containing one
        #[arg(long)]
        diff: PathBuf,
        /// Generator confidence (0-100); estimated when omitted
        #[arg(long)]
        confidence: Option<u8>,
    },
    /// Validate a received patch, or override a soft rejection
    Approve { id: String },
    /// Reject a patch
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Apply an approved patch to the working tree
    Execute { id: String },
    /// Restore the files an executed patch changed
    Rollback { id: String },
    /// Show one patch with its validation and attempts
    Show { id: String },
    /// List patches
    List {
        /// Only patches in this status
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        issue: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the audit trail
    Audit {
        /// Only entries for this patch
        id: Option<String>,
        /// Write entries to a file (.json, or .jsonl for one entry per line)
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default warden.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = patchwarden::init::is_initialized(&project_dir)
        .then(|| project_dir.join(patchwarden::config::WARDEN_DIR).join("logs"));
    let _log_guard = patchwarden::logging::init(cli.verbose, log_dir.as_deref())?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Submit {
            issue,
            diff,
            confidence,
        } => cmd::cmd_submit(&project_dir, &cli, issue, diff, *confidence).await?,
        Commands::Approve { id } => cmd::cmd_approve(&project_dir, &cli, id).await?,
        Commands::Reject { id, reason } => cmd::cmd_reject(&project_dir, &cli, id, reason).await?,
        Commands::Execute { id } => cmd::cmd_execute(&project_dir, &cli, id).await?,
        Commands::Rollback { id } => cmd::cmd_rollback(&project_dir, &cli, id).await?,
        Commands::Show { id } => cmd::cmd_show(&project_dir, &cli, id)?,
        Commands::List {
            status,
            issue,
            limit,
        } => cmd::cmd_list(&project_dir, &cli, status.as_deref(), issue.as_deref(), *limit)?,
        Commands::Audit { id, export } => {
            cmd::cmd_audit(&project_dir, &cli, id.as_deref(), export.as_deref())?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
