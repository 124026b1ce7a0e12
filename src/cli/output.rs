//! Shared output formatting for CLI commands.
//!
//! Every command prints a one-line summary followed by a machine-readable
//! block in the selected format. Logs go to stderr, so stdout stays
//! parseable.

use std::io::Write;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// Render data in the given format.
pub fn render<T: Serialize>(data: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(data).context("Failed to serialize to JSON"),
        OutputFormat::Yaml => serde_yaml::to_string(data).context("Failed to serialize to YAML"),
    }
}

/// Write the summary line and the rendered block.
pub fn write_report<W: Write, T: Serialize>(
    out: &mut W,
    summary: &str,
    data: &T,
    format: OutputFormat,
) -> Result<()> {
    let body = render(data, format)?;
    writeln!(out, "{}", summary).context("Failed to write output")?;
    writeln!(out, "{}", body.trim_end()).context("Failed to write output")?;
    Ok(())
}

/// Print the summary line and the rendered block to stdout.
pub fn print_report<T: Serialize>(summary: &str, data: &T, format: OutputFormat) -> Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_report(&mut handle, summary, data, format)
}

/// Truncate string to maximum length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}
