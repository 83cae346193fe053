//! Output rendering helpers.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

/// How command results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable fields.
    Table,
    /// Pretty-printed JSON.
    Json,
    /// YAML.
    Yaml,
}

/// Print a serializable value in the structured formats; the caller
/// renders the table form itself.
pub fn print_structured<T: Serialize>(format: OutputFormat, value: &T) -> Result<bool> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(true)
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
            Ok(true)
        }
        OutputFormat::Table => Ok(false),
    }
}

/// Section header for table output.
pub fn print_section(title: &str) {
    println!("\n{title}");
    println!("{}", "-".repeat(title.len()));
}

/// Aligned name/value line for table output.
pub fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {name:<18} {value}");
}
