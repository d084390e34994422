//! Report rendering for the command line.
//!
//! Reports print either as human-readable text (their `Display`) or as
//! pretty JSON for CI tooling.

use std::fmt::Display;

use serde::Serialize;

/// How reports are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Renders a report in the requested format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render<T>(report: &T, format: OutputFormat) -> Result<String, serde_json::Error>
where
    T: Serialize + Display,
{
    match format {
        OutputFormat::Text => Ok(report.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(report),
    }
}
