//! Variant bucketing command
//!
//! ```bash
//! growth-copilot bucket --spec spec.yaml --user-id user-42
//! growth-copilot bucket --key checkout-cta --user-id user-42
//! ```

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;

use growth_copilot_core::bucketing;

use crate::output::{print_field, print_section, print_structured, OutputFormat};

use super::parse_spec;

/// Show the deterministic bucket (and variant, when a spec is given)
/// for a user.
#[derive(Debug, Args)]
pub struct BucketCommand {
    /// Experiment spec file; enables variant resolution
    #[arg(long, conflicts_with = "key")]
    pub spec: Option<PathBuf>,

    /// Bare experiment key; bucket number only
    #[arg(long)]
    pub key: Option<String>,

    /// Stable user identifier
    #[arg(long)]
    pub user_id: String,
}

#[derive(Serialize)]
struct BucketReport<'a> {
    key: &'a str,
    user_id: &'a str,
    bucket: u64,
    variant: Option<&'a str>,
}

pub fn execute(format: OutputFormat, cmd: BucketCommand) -> Result<()> {
    let spec = match &cmd.spec {
        Some(path) => Some(parse_spec(&std::fs::read_to_string(path).with_context(
            || format!("Failed to read spec file: {}", path.display()),
        )?)?),
        None => None,
    };
    let key = match (&spec, &cmd.key) {
        (Some(spec), _) => spec.key.as_str().to_string(),
        (None, Some(key)) => key.clone(),
        (None, None) => anyhow::bail!("Either --spec or --key must be provided"),
    };

    let report = BucketReport {
        key: &key,
        user_id: &cmd.user_id,
        bucket: bucketing::bucket_for(&key, &cmd.user_id),
        variant: spec
            .as_ref()
            .and_then(|spec| bucketing::assign_variant(spec, &cmd.user_id)),
    };
    if !print_structured(format, &report)? {
        print_section(&format!("Bucket: {key}"));
        print_field("user", report.user_id);
        print_field(
            "bucket",
            format!("{} / {}", report.bucket, bucketing::BUCKET_SPACE),
        );
        if let Some(variant) = report.variant {
            print_field("variant", variant);
        }
    }
    Ok(())
}
