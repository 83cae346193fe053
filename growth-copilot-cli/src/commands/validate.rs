//! Guardrail validation command
//!
//! ```bash
//! growth-copilot validate --input spec.yaml
//! cat spec.yaml | growth-copilot validate --stdin
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use growth_copilot_core::guardrail::{self, ValidationResult};

use crate::output::{print_field, print_section, print_structured, OutputFormat};

use super::{parse_spec, read_input};

/// Validate an experiment spec against the guardrails.
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Input file path (YAML or JSON)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Read input from stdin
    #[arg(long)]
    pub stdin: bool,
}

#[derive(Serialize)]
struct ValidateReport<'a> {
    key: &'a str,
    valid: bool,
    reasons: &'a [String],
    required_sample_size: Option<u64>,
}

pub fn execute(format: OutputFormat, cmd: ValidateCommand) -> Result<()> {
    let spec = parse_spec(&read_input(cmd.input, cmd.stdin)?)?;
    let result = guardrail::validate(&spec);

    let report = ValidateReport {
        key: spec.key.as_str(),
        valid: result.is_valid(),
        reasons: result.reasons(),
        required_sample_size: guardrail::required_sample_size(&spec),
    };
    if !print_structured(format, &report)? {
        print_section(&format!("Guardrail check: {}", report.key));
        print_field("valid", report.valid);
        if let Some(required) = report.required_sample_size {
            print_field("required sample", required);
        }
        if let ValidationResult::Invalid(reasons) = &result {
            for reason in reasons {
                println!("  - {reason}");
            }
        }
    }

    if !result.is_valid() {
        std::process::exit(1);
    }
    Ok(())
}
