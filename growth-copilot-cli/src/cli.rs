//! CLI argument parsing

use clap::{Parser, Subcommand};

use crate::commands::{
    bucket::BucketCommand, decide::DecideCommand, simulate::SimulateCommand,
    validate::ValidateCommand,
};
use crate::output::OutputFormat;

/// Growth Experiment Co-Pilot
///
/// A command-line tool for validating experiment specs, evaluating
/// decisions over counts snapshots, and simulating the pipeline offline.
#[derive(Parser, Debug)]
#[command(name = "growth-copilot")]
#[command(version)]
#[command(about = "CLI for the Growth Experiment Co-Pilot core", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (table, json, yaml)
    #[arg(
        short,
        long,
        global = true,
        default_value = "table",
        env = "GROWTH_COPILOT_OUTPUT"
    )]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the guardrail validator over an experiment spec
    #[command(alias = "check")]
    Validate(ValidateCommand),

    /// Evaluate the decision engine over a spec and a counts snapshot
    Decide(DecideCommand),

    /// Show the deterministic variant assignment for a user
    Bucket(BucketCommand),

    /// Run the full pipeline in-process with stub collaborators
    #[command(alias = "sim")]
    Simulate(SimulateCommand),
}
