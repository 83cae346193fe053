//! Offline decision evaluation
//!
//! ```bash
//! growth-copilot decide --spec spec.yaml --counts counts.json --age-days 7
//! ```
//!
//! The counts document is the per-variant, per-metric accumulator
//! snapshot a monitor job would carry.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;

use growth_copilot_core::engine;
use growth_copilot_core::{DecisionEvent, VariantCounts};

use crate::output::{print_field, print_section, print_structured, OutputFormat};

use super::parse_spec;

/// Evaluate the decision engine over a spec and counts snapshot.
#[derive(Debug, Args)]
pub struct DecideCommand {
    /// Experiment spec file (YAML or JSON)
    #[arg(long)]
    pub spec: PathBuf,

    /// Counts snapshot file (JSON or YAML)
    #[arg(long)]
    pub counts: PathBuf,

    /// Experiment age in days since launch
    #[arg(long, default_value_t = 0.0)]
    pub age_days: f64,
}

pub fn execute(format: OutputFormat, cmd: DecideCommand) -> Result<()> {
    let spec = parse_spec(&std::fs::read_to_string(&cmd.spec).with_context(|| {
        format!("Failed to read spec file: {}", cmd.spec.display())
    })?)?;
    let raw_counts = std::fs::read_to_string(&cmd.counts)
        .with_context(|| format!("Failed to read counts file: {}", cmd.counts.display()))?;
    let counts: VariantCounts =
        serde_yaml::from_str(&raw_counts).context("Failed to parse counts snapshot")?;

    let recommendation = engine::evaluate(&spec, &counts, cmd.age_days)
        .context("Decision engine could not evaluate this snapshot")?;
    let inputs_hash = DecisionEvent::compute_inputs_hash(&counts)?;

    if !print_structured(format, &recommendation)? {
        print_section(&format!("Decision: {}", spec.key));
        print_field("decision", &recommendation.decision);
        print_field("evidence", format!("{:.4}", recommendation.evidence));
        print_field("confidence", format!("{:.4}", recommendation.confidence));
        print_field("sample size", recommendation.sample_size);
        print_field("rationale", &recommendation.rationale);
        print_field("risk note", &recommendation.risk_note);
        print_field("inputs hash", &inputs_hash);
    }
    Ok(())
}
