use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Table};
use serde::Serialize;

use convoy::{
    AppliedMigration, FileMigration, MigrateError, MigrationSource, MigrationStats, Migrator, Plan,
    RedisBackend,
};

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::{CliSink, OutputManager, TableDisplay};
use crate::theme::ICONS;
use crate::utils::{format_datetime, format_duration_ms};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Apply Migrations",
        commands: &[
            "convoy migrate up                    # Apply every pending migration",
            "convoy migrate up --max-attempts 5   # Give up if the lock stays busy",
        ],
    },
    ExampleGroup {
        title: "Inspect",
        commands: &[
            "convoy migrate status                # Applied and pending migrations",
            "convoy --output json migrate status  # Same, as JSON",
        ],
    },
];

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Apply pending migrations (Ctrl-C stops between migrations)
    #[command(name = "up")]
    Up {
        /// Redis connection URL, overrides convoy.toml
        #[arg(long, env = "REDIS_URL")]
        redis_url: Option<String>,

        /// Stop after this many failed lock attempts (0 waits forever)
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Show applied and pending migrations without taking the lock
    #[command(name = "status")]
    Status {
        /// Redis connection URL, overrides convoy.toml
        #[arg(long, env = "REDIS_URL")]
        redis_url: Option<String>,
    },
}

pub async fn handle_migrate_commands(command: MigrateCommands, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;

    match command {
        MigrateCommands::Up {
            redis_url,
            max_attempts,
        } => handle_up(&ctx, redis_url.as_deref(), max_attempts, output).await,
        MigrateCommands::Status { redis_url } => handle_status(&ctx, redis_url.as_deref(), output).await,
    }
}

fn load_migrations(ctx: &ProjectContext, output: &OutputManager) -> Result<Vec<FileMigration>> {
    output.key_value("Config", &ctx.config_path.display().to_string());
    let source = ctx.source();
    let migrations = source
        .load()
        .with_context(|| format!("Failed to load migrations from {}", source.dir().display()))?;
    output.key_value("Migrations", &format!("{} in {}", migrations.len(), source.dir().display()));
    Ok(migrations)
}

async fn connect(ctx: &ProjectContext, redis_url: Option<&str>, output: &OutputManager) -> Result<RedisBackend> {
    let redis_url = ctx.redis_url(redis_url).map_err(|err| {
        output.error("No Redis URL: pass --redis-url, set REDIS_URL, or edit convoy.toml");
        err
    })?;

    output.progress("Connecting to Redis");
    let backend = RedisBackend::connect(&redis_url, ctx.redis_config())
        .await
        .context("Failed to connect to Redis")?;
    output.clear_line();
    output.success(&format!("Connected (namespace '{}')", backend.keys().namespace()));
    Ok(backend)
}

async fn handle_up(
    ctx: &ProjectContext,
    redis_url: Option<&str>,
    max_attempts: Option<u32>,
    output: &OutputManager,
) -> Result<()> {
    output.heading("Apply Migrations");

    let migrations = load_migrations(ctx, output)?;
    let backend = connect(ctx, redis_url, output).await?;

    let mut migrator = Migrator::new(backend)
        .with_config(ctx.migrator_config(max_attempts))
        .with_sink(Arc::new(CliSink::new(output.clone())));

    let shutdown = async {
        // A failed handler registration must not look like a Ctrl-C.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    match migrator.run_until(&migrations, shutdown).await {
        Ok(stats) => {
            output.status(ICONS.unlock, "Lock released");
            output.heading("Summary");
            output.display(&stats)?;
            Ok(())
        }
        Err(MigrateError::Cancelled { applied }) => {
            output.warning(&format!(
                "Interrupted after applying {} migration(s); rerun to continue",
                applied.len()
            ));
            for id in &applied {
                output.bullet(id);
            }
            anyhow::bail!("Migration run cancelled")
        }
        Err(err) => {
            if let Some(id) = err.failed_migration() {
                output.info(&format!("Migrations before {id} remain applied."));
            }
            Err(err.into())
        }
    }
}

impl TableDisplay for MigrationStats {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table(&["Applied", "Already applied", "Lock attempts", "Total time"]);
        table.add_row(vec![
            Cell::new(self.migrations_applied()),
            Cell::new(self.already_applied),
            Cell::new(self.lock_attempts),
            Cell::new(format_duration_ms(self.total_time_ms)),
        ]);
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "applied={} already_applied={} lock_attempts={} total_ms={}",
            self.migrations_applied(),
            self.already_applied,
            self.lock_attempts,
            self.total_time_ms
        )
    }
}

/// Applied history joined with the local migration files
#[derive(Debug, Serialize)]
struct StatusReport {
    namespace: String,
    applied: Vec<AppliedMigration>,
    pending: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
}

impl StatusReport {
    fn build(namespace: &str, applied: Vec<AppliedMigration>, known: &[&str], plan: Result<Plan, String>) -> Self {
        let (pending, problem) = match plan {
            Ok(plan) => (known[plan.pending_range()].iter().map(|id| id.to_string()).collect(), None),
            Err(problem) => (Vec::new(), Some(problem)),
        };
        Self {
            namespace: namespace.to_string(),
            applied,
            pending,
            problem,
        }
    }
}

impl TableDisplay for StatusReport {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table(&["Migration", "Status", "Applied at", "Duration"]);
        for record in &self.applied {
            table.add_row(vec![
                Cell::new(&record.id),
                Cell::new(format!("{} applied", ICONS.success)),
                Cell::new(format_datetime(record.applied_at)),
                Cell::new(format_duration_ms(record.execution_time_ms)),
            ]);
        }
        for id in &self.pending {
            table.add_row(vec![
                Cell::new(id),
                Cell::new(format!("{} pending", ICONS.pending)),
                Cell::new("-"),
                Cell::new("-"),
            ]);
        }
        if self.applied.is_empty() && self.pending.is_empty() {
            table.add_row(vec![Cell::new("No migrations found")]);
        }
        table
    }

    fn to_compact(&self) -> String {
        match &self.problem {
            Some(problem) => format!("applied={} error={problem}", self.applied.len()),
            None => format!("applied={} pending={}", self.applied.len(), self.pending.len()),
        }
    }
}

async fn handle_status(ctx: &ProjectContext, redis_url: Option<&str>, output: &OutputManager) -> Result<()> {
    output.heading("Migration Status");

    let migrations = load_migrations(ctx, output)?;
    let mut backend = connect(ctx, redis_url, output).await?;

    let records = backend.records().await.context("Failed to read applied migrations")?;
    let namespace = backend.keys().namespace().to_string();

    let mut migrator = Migrator::new(backend);
    let plan = match migrator.plan(&migrations).await {
        Ok(plan) => Ok(plan),
        Err(MigrateError::History(err)) => Err(err.to_string()),
        Err(err) => return Err(err.into()),
    };

    let known: Vec<&str> = migrations.iter().map(|migration| migration.id()).collect();
    let report = StatusReport::build(&namespace, records, &known, plan);
    output.display(&report)?;

    if let Some(problem) = &report.problem {
        output.error(problem);
        anyhow::bail!("Applied history does not match the migration files");
    }

    if report.pending.is_empty() {
        output.success("Up to date");
    } else {
        output.info(&format!("{} migration(s) pending", report.pending.len()));
    }
    Ok(())
}
