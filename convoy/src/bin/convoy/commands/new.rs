use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::OutputManager;
use crate::utils::{migration_filename, sanitize_name};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Create Migrations",
    commands: &[
        "convoy new --name init               # Create the first migration",
        "convoy new --name add_user_index     # Append another one",
    ],
}];

#[derive(Args)]
pub struct NewArgs {
    /// Name for the migration (e.g., add_avatar, backfill_emails)
    #[arg(short, long)]
    pub name: String,
}

pub async fn handle_new(args: NewArgs, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;

    if sanitize_name(&args.name).trim_matches('_').is_empty() {
        output.error("Migration name must contain at least one letter or digit");
        anyhow::bail!("Invalid migration name");
    }

    let extension = ctx.config.migrations.extension.as_str();
    let filename = migration_filename(&args.name, extension, Utc::now());
    let dir = ctx.migrations_dir();
    let path = dir.join(&filename);

    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    tokio::fs::write(&path, template(&args.name, extension))
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    output.success(&format!("Created {}", path.display()));
    output.info("Migrations are append-only: never rename or edit one that has been applied.");

    Ok(())
}

fn template(name: &str, extension: &str) -> String {
    match extension.trim_start_matches('.') {
        "lua" => format!(
            "-- Migration: {name}\n\
             -- Runs inside a single Redis script. Use redis.call(...) and do not touch KEYS or ARGV.\n\n"
        ),
        _ => format!("-- Migration: {name}\n\n"),
    }
}
