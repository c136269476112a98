use anyhow::{Context, Result};
use clap::Args;

use crate::context::{CONFIG_FILE, ConvoyConfig};
use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Set Up",
    commands: &[
        "convoy init                          # Lua migrations in ./migrations",
        "convoy init --dir db --extension sql # SQL migrations in ./db",
        "convoy init --force                  # Overwrite an existing convoy.toml",
    ],
}];

#[derive(Args)]
pub struct InitArgs {
    /// Directory holding migration files, relative to convoy.toml
    #[arg(long, default_value = "migrations")]
    pub dir: String,

    /// Extension of migration files
    #[arg(long, default_value = "lua")]
    pub extension: String,

    /// Overwrite an existing convoy.toml
    #[arg(long)]
    pub force: bool,
}

pub async fn handle_init(args: InitArgs, output: &OutputManager) -> Result<()> {
    let project_root = std::env::current_dir().context("Failed to get current directory")?;
    let config_path = project_root.join(CONFIG_FILE);

    output.heading("Initialize Convoy");

    if config_path.exists() && !args.force {
        output.warning(&format!("{CONFIG_FILE} already exists"));
        output.info("Use --force to overwrite it.");
        return Ok(());
    }

    let mut config = ConvoyConfig::default();
    config.migrations.dir = args.dir;
    config.migrations.extension = args.extension.trim_start_matches('.').to_string();

    let body = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    let content = format!("# Convoy migration settings. ${{VAR}} values expand from the environment.\n\n{body}");
    tokio::fs::write(&config_path, content)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    output.success(&format!("Created {CONFIG_FILE}"));

    let migrations_dir = project_root.join(&config.migrations.dir);
    tokio::fs::create_dir_all(&migrations_dir)
        .await
        .with_context(|| format!("Failed to create {}", migrations_dir.display()))?;
    output.success(&format!("Migrations directory: {}", config.migrations.dir));

    output.info("Next steps:");
    output.bullet("Set REDIS_URL or edit the [redis] section");
    output.bullet("Run 'convoy new --name init' to create a migration");
    output.bullet("Run 'convoy migrate up' to apply it");

    Ok(())
}
