use anyhow::Result;
use clap::ValueEnum;
use colored::{Color, Colorize};
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;
use std::io::Write;

use convoy::{LogSink, MigrateEvent, ProgressSink};

use crate::theme::{ICONS, THEME};

/// Output format options for CLI commands
#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

/// Global CLI options that affect output and behavior
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Data that can be rendered in every output format
pub trait TableDisplay {
    fn to_table(&self, output: &OutputManager) -> Table;
    fn to_compact(&self) -> String;
}

/// Output manager handles formatting and display
#[derive(Clone, Debug)]
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    fn is_json(&self) -> bool {
        self.options.output_format == OutputFormat::Json
    }

    /// Human-readable messages are suppressed in quiet and JSON modes
    fn chatty(&self) -> bool {
        !self.options.quiet && !self.is_json()
    }

    /// Display data according to the configured output format
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        match self.options.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                println!("{json}");
            }
            _ if self.options.quiet => {}
            OutputFormat::Table => {
                let table = data.to_table(self);
                println!("{table}");
            }
            OutputFormat::Compact => {
                println!("{}", data.to_compact());
            }
        }
        Ok(())
    }

    fn line(&self, icon: &str, color: Color, message: &str) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    pub fn success(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.line(ICONS.success, THEME.success, message));
        }
    }

    /// Errors always go to stderr, even in quiet mode
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.line(ICONS.error, THEME.error, message));
    }

    pub fn warning(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.line(ICONS.warning, THEME.warning, message));
        }
    }

    pub fn info(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.line(ICONS.info, THEME.info, message));
        }
    }

    /// Only shown with --verbose
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && self.chatty() {
            eprintln!("{}", self.line(ICONS.arrow, THEME.muted, message));
        }
    }

    /// Status line with a custom icon
    pub fn status(&self, icon: &str, message: &str) {
        if self.chatty() {
            println!("{}", self.line(icon, THEME.highlight, message));
        }
    }

    pub fn heading(&self, text: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("\n{text}\n{}", "=".repeat(text.chars().count()))
            } else {
                format!("\n{}", text.color(THEME.primary).bold())
            };
            println!("{output}");
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("{key}: {value}")
            } else {
                format!("{}: {}", key.color(THEME.key).bold(), value.color(THEME.value))
            };
            println!("{output}");
        }
    }

    pub fn bullet(&self, text: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("  {} {text}", ICONS.bullet)
            } else {
                format!("  {} {text}", ICONS.bullet.color(THEME.muted))
            };
            println!("{output}");
        }
    }

    /// Create a themed table with a bold header row
    pub fn create_table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        if self.options.no_color {
            table.load_preset(comfy_table::presets::ASCII_FULL);
        } else {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
        }

        let header_cells: Vec<Cell> = headers
            .iter()
            .map(|header| {
                let cell = Cell::new(header).add_attribute(Attribute::Bold);
                if self.options.no_color { cell } else { cell.fg(TableColor::Cyan) }
            })
            .collect();
        table.set_header(header_cells);
        table
    }

    /// In-place progress indicator, cleared by [`OutputManager::clear_line`]
    pub fn progress(&self, message: &str) {
        if !self.chatty() {
            return;
        }

        let output = if self.options.no_color {
            format!("{} {message}...", ICONS.loading)
        } else {
            format!(
                "{} {}...",
                ICONS.loading.color(THEME.highlight).bold(),
                message.color(THEME.highlight)
            )
        };

        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    pub fn clear_line(&self) {
        if !self.chatty() {
            return;
        }

        print!("\r{}\r", " ".repeat(80));
        std::io::stdout().flush().ok();
    }
}

/// Renders migrator events on the terminal and forwards them to the log.
pub struct CliSink {
    output: OutputManager,
    log: LogSink,
}

impl CliSink {
    pub fn new(output: OutputManager) -> Self {
        Self {
            output,
            log: LogSink::new(),
        }
    }
}

impl ProgressSink for CliSink {
    fn event(&self, event: &MigrateEvent) {
        self.log.event(event);

        let output = &self.output;
        match event {
            MigrateEvent::LockAttempt { .. } | MigrateEvent::Releasing => output.verbose(&event.to_string()),
            MigrateEvent::LockUnavailable { .. } | MigrateEvent::Cancelled | MigrateEvent::UnlockFailed { .. } => {
                output.warning(&event.to_string())
            }
            MigrateEvent::LockAcquired { attempts } => {
                output.status(ICONS.lock, &format!("Lock acquired after {attempts} attempt(s)"))
            }
            MigrateEvent::HistoryRejected { .. } => output.error(&event.to_string()),
            MigrateEvent::UpToDate { .. } => output.success(&event.to_string()),
            MigrateEvent::Pending { .. } => output.info(&event.to_string()),
            MigrateEvent::Applying { .. } => output.progress(&event.to_string()),
            MigrateEvent::Applied { .. } => {
                output.clear_line();
                output.success(&event.to_string());
            }
            MigrateEvent::ApplyFailed { .. } => {
                output.clear_line();
                output.error(&event.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    impl TableDisplay for TestData {
        fn to_table(&self, output: &OutputManager) -> Table {
            let mut table = output.create_table(&["Name", "Value"]);
            table.add_row(vec![Cell::new(&self.name), Cell::new(self.value)]);
            table
        }

        fn to_compact(&self) -> String {
            format!("{}={}", self.name, self.value)
        }
    }

    fn manager(output_format: OutputFormat, quiet: bool) -> OutputManager {
        OutputManager::new(GlobalOptions {
            output_format,
            quiet,
            no_color: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_display_every_format() {
        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };
        for format in [OutputFormat::Table, OutputFormat::Json, OutputFormat::Compact] {
            assert!(manager(format, false).display(&data).is_ok());
        }
        assert!(manager(OutputFormat::Table, true).display(&data).is_ok());
    }

    #[test]
    fn test_json_mode_is_not_chatty() {
        assert!(!manager(OutputFormat::Json, false).chatty());
        assert!(!manager(OutputFormat::Table, true).chatty());
        assert!(manager(OutputFormat::Compact, false).chatty());
    }

    #[test]
    fn test_table_has_header() {
        let table = manager(OutputFormat::Table, false).create_table(&["Migration", "Status"]);
        let rendered = table.to_string();
        assert!(rendered.contains("Migration"));
        assert!(rendered.contains("Status"));
    }
}
