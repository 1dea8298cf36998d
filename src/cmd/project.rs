//! `patchwarden init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use patchwarden::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized patchwarden project at {}",
            result.warden_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .patchwarden/");
        println!("  ├── warden.toml   # Configuration");
        println!("  ├── backups/      # Pre-change snapshots, one per attempt");
        println!("  ├── logs/         # JSON logs");
        println!("  └── scratch/      # External checker temp files");
        println!();
        println!("Next steps:");
        println!("  1. Review .patchwarden/warden.toml");
        println!("  2. Run `patchwarden submit --issue <issue.json> --diff <patch.diff>`");
    } else {
        println!(
            "patchwarden project already initialized at {}",
            result.warden_dir.display()
        );
        if result.wrote_config {
            println!("Wrote missing warden.toml.");
        }
        println!("Directory structure verified.");
    }

    Ok(())
}
