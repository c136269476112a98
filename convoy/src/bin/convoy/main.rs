mod commands;
mod context;
mod examples;
mod output;
mod theme;
mod utils;

use anyhow::Result;
use clap::{ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand, error::ErrorKind};
use colored::{Color, Colorize, control::ShouldColorize};
use std::fmt::Write;
use std::io::{self, Write as IoWrite};

use commands::{
    init::{InitArgs, handle_init},
    migrate::{MigrateCommands, handle_migrate_commands},
    new::{NewArgs, handle_new},
};
use examples::{COMMAND_EXAMPLES, ExampleGroup};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME, help_styles};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("REDIS_URL", "Redis connection URL, overrides convoy.toml"),
    ("RUST_LOG", "Log filter, e.g. convoy=debug"),
];

#[derive(Parser)]
#[command(name = "convoy")]
#[command(version)]
#[command(
    about = "Lock-coordinated, append-only schema migrations",
    long_about = r#"Schema migration runner that is safe to start from every replica at once:

• One process takes the migration lock and applies pending migrations
• The others wait for the lock, then find nothing left to do
• Applied history must be a prefix of the migration files, in order

Commands:
  init      Create convoy.toml and the migrations directory
  new       Create a timestamped migration file
  migrate   Apply migrations or show their status
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize convoy in the current directory
    Init(InitArgs),

    /// Create a new migration file
    New(NewArgs),

    /// Apply migrations or inspect their status
    #[command(subcommand)]
    Migrate(MigrateCommands),
}

impl Cli {
    fn parse_with_styles() -> Self {
        let matches = match build_cli_command().styles(help_styles()).try_get_matches() {
            Ok(matches) => matches,
            Err(err) => exit_with_clap_error(err),
        };
        match Cli::from_arg_matches(&matches) {
            Ok(cli) => cli,
            Err(err) => exit_with_clap_error(err),
        }
    }
}

/// Prints help, version or a usage error framed by blank lines, then exits.
fn exit_with_clap_error(err: clap::error::Error) -> ! {
    let to_stdout = matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion);
    let blank = if to_stdout {
        print_blank_line_stdout
    } else {
        print_blank_line_stderr
    };

    let _ = blank();
    if let Err(print_err) = err.print()
        && print_err.kind() != io::ErrorKind::BrokenPipe
    {
        eprintln!("Failed to display help: {print_err}");
    }
    let _ = blank();
    std::process::exit(err.exit_code());
}

fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .after_long_help(render_top_level_appendix(use_color))
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never });

    for example in COMMAND_EXAMPLES {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            let updated = subcommand.clone().after_long_help(render_examples(example.groups, use_color));
            *subcommand = updated;
        }
    }
    command
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let theme = &THEME;
    let mut buffer = String::new();

    let _ = writeln!(buffer, "{}", stylize("Examples:", theme.highlight, true, use_color));
    for (index, group) in groups.iter().enumerate() {
        let _ = writeln!(buffer, "  {}", stylize(group.title, theme.primary, true, use_color));
        for command in group.commands {
            let arrow = stylize(ICONS.arrow, theme.secondary, false, use_color);
            let _ = writeln!(buffer, "    {arrow} {}", stylize(command, theme.secondary, false, use_color));
        }
        if index + 1 < groups.len() {
            buffer.push('\n');
        }
    }
    buffer
}

fn render_top_level_appendix(use_color: bool) -> String {
    let theme = &THEME;
    let mut buffer = String::new();

    let _ = writeln!(buffer, "{}", stylize("Environment Variables:", theme.highlight, true, use_color));
    for (key, description) in ENVIRONMENT_VARIABLES {
        let key_text = stylize(key, theme.key, true, use_color);
        let _ = writeln!(buffer, "  {key_text}  {}", stylize(description, theme.value, false, use_color));
    }

    buffer.push('\n');
    let _ = writeln!(
        buffer,
        "{} {}",
        stylize("Tip:", theme.highlight, true, use_color),
        stylize(
            "Use 'convoy <command> --help' to view examples for each command.",
            theme.secondary,
            false,
            use_color,
        )
    );
    buffer
}

fn print_blank_line_stdout() -> io::Result<()> {
    let mut stdout = io::stdout();
    IoWrite::write_all(&mut stdout, b"\n")?;
    IoWrite::flush(&mut stdout)
}

fn print_blank_line_stderr() -> io::Result<()> {
    let mut stderr = io::stderr();
    IoWrite::write_all(&mut stderr, b"\n")?;
    IoWrite::flush(&mut stderr)
}

fn stylize(text: &str, color: Color, bold: bool, use_color: bool) -> String {
    match (use_color, bold) {
        (false, _) => text.to_string(),
        (true, true) => text.color(color).bold().to_string(),
        (true, false) => text.color(color).to_string(),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "convoy=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_with_styles();
    init_logging(cli.verbose);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let _ = print_blank_line_stdout();

    match execute(cli).await {
        Ok(()) => {
            let _ = print_blank_line_stdout();
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            let _ = print_blank_line_stdout();
            std::process::exit(1);
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    });

    match cli.command {
        Commands::Init(args) => handle_init(args, &output).await,
        Commands::New(args) => handle_new(args, &output).await,
        Commands::Migrate(command) => handle_migrate_commands(command, &output).await,
    }
}
