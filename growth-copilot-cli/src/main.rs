//! Growth Co-Pilot CLI
//!
//! Command-line interface for the deterministic experiment core:
//! guardrail validation, offline decision evaluation, variant bucketing
//! and an in-process pipeline simulation.

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("growth_copilot=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate(cmd) => commands::validate::execute(cli.output, cmd),
        Commands::Decide(cmd) => commands::decide::execute(cli.output, cmd),
        Commands::Bucket(cmd) => commands::bucket::execute(cli.output, cmd),
        Commands::Simulate(cmd) => commands::simulate::execute(cli.output, cmd).await,
    }
}
