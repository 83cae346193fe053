//! Command implementations

pub mod bucket;
pub mod decide;
pub mod simulate;
pub mod validate;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context as _, Result};

use growth_copilot_core::ExperimentSpec;

/// Read a file, or stdin when `use_stdin` is set.
pub fn read_input(file: Option<PathBuf>, use_stdin: bool) -> Result<String> {
    if use_stdin {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        Ok(buffer)
    } else if let Some(path) = file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {}", path.display()))
    } else {
        anyhow::bail!("Either --input or --stdin must be provided")
    }
}

/// Parse a spec document. YAML is a superset of JSON, so both parse
/// through the same path.
pub fn parse_spec(raw: &str) -> Result<ExperimentSpec> {
    serde_yaml::from_str(raw).context("Failed to parse experiment spec")
}
