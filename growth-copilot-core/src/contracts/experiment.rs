//! Experiment specification contracts.
//!
//! An [`ExperimentSpec`] is produced by the drafting collaborator from a
//! free-text idea and, once past the guardrail validator and policy
//! review, drives instrumentation and monitoring. The spec is immutable
//! for a given revision; a rejected spec can only come back as a new
//! revision of the same key.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Opaque unique identifier for one experiment.
///
/// The single coordination unit for locking, lookup and deduplication.
/// Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentKey(String);

impl ExperimentKey {
    /// Wrap a raw key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExperimentKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of a tracked metric.
///
/// Closed set: any other kind in a submitted document is rejected at
/// deserialization, which is where unsupported-metric-kind inputs
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Binomial metric: successes over exposures.
    Rate,
    /// Continuous metric: running sum, count and sum of squares.
    Mean,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => f.write_str("rate"),
            Self::Mean => f.write_str("mean"),
        }
    }
}

/// A single tracked metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MetricSpec {
    /// Metric name, unique within the experiment.
    #[validate(length(min = 1, max = 128))]
    pub name: String,

    /// Metric kind, selects the analysis path.
    pub kind: MetricKind,

    /// Analytics event the metric is derived from.
    pub event: String,

    /// Optional event property the metric reads (mean metrics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

fn default_variants() -> Vec<String> {
    vec!["control".to_string(), "treatment".to_string()]
}

fn default_control() -> String {
    "control".to_string()
}

fn default_mde() -> f64 {
    0.05
}

fn default_alpha() -> f64 {
    0.05
}

fn default_power() -> f64 {
    0.8
}

fn default_min_sample_size() -> u64 {
    2000
}

fn default_max_duration_days() -> u32 {
    21
}

/// A complete experiment specification.
///
/// Invariants (enforced by the guardrail validator, not by construction):
/// at least two distinct variants, exactly one of which is the designated
/// control; `mde` in `(0, 1]`; `min_sample_size` consistent with the
/// `mde`/`alpha`/`power` power calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExperimentSpec {
    /// Experiment key.
    pub key: ExperimentKey,

    /// Hypothesis statement, human readable.
    #[validate(length(min = 1, max = 2048))]
    pub hypothesis: String,

    /// Ordered variant names. The first entry is conventionally the
    /// control, but `control` below is authoritative.
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,

    /// The designated control variant. Must be a member of `variants`.
    #[serde(default = "default_control")]
    pub control: String,

    /// Primary decision metric.
    #[validate(nested)]
    pub primary_metric: MetricSpec,

    /// Secondary metrics, observed but not decision-driving.
    #[serde(default)]
    pub secondary_metrics: Vec<MetricSpec>,

    /// Audience segment filters, opaque to the core.
    #[serde(default)]
    pub segment_filters: BTreeMap<String, serde_json::Value>,

    /// Minimum detectable effect, in `(0, 1]`.
    #[serde(default = "default_mde")]
    pub mde: f64,

    /// False-positive rate. The domain fixes this at 0.05.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Statistical power. Must be at least 0.8.
    #[serde(default = "default_power")]
    pub power: f64,

    /// Minimum total sample size (across both arms) before a ship
    /// decision is allowed, early-stop exception aside.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,

    /// Maximum experiment duration before an inconclusive timeout stop.
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u32,

    /// Feature flag key backing the rollout, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_key: Option<String>,

    /// Spec creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ExperimentSpec {
    /// The first non-control variant, the treatment arm the decision
    /// engine compares against the control.
    pub fn treatment(&self) -> Option<&str> {
        self.variants
            .iter()
            .find(|v| **v != self.control)
            .map(String::as_str)
    }

    /// All tracked metrics, primary first.
    pub fn metrics(&self) -> impl Iterator<Item = &MetricSpec> {
        std::iter::once(&self.primary_metric).chain(self.secondary_metrics.iter())
    }
}

/// Cumulative counts for one metric on one variant.
///
/// Counts are authoritative cumulative totals reported per monitoring
/// tick, never deltas. Both shapes are monotonically non-decreasing
/// across an experiment revision's life; the state machine rejects any
/// tick that would make a stored accumulator go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricAccumulator {
    /// Binomial counts for a rate metric.
    Rate {
        /// Users exposed to the variant.
        exposures: u64,
        /// Users who performed the success event.
        successes: u64,
    },
    /// Running moments for a mean metric.
    Mean {
        /// Observation count.
        n: u64,
        /// Sum of observed values.
        sum: f64,
        /// Sum of squared observed values.
        sum_sq: f64,
    },
}

impl MetricAccumulator {
    /// An empty accumulator of the given kind.
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Rate => Self::Rate {
                exposures: 0,
                successes: 0,
            },
            MetricKind::Mean => Self::Mean {
                n: 0,
                sum: 0.0,
                sum_sq: 0.0,
            },
        }
    }

    /// The kind this accumulator belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Rate { .. } => MetricKind::Rate,
            Self::Mean { .. } => MetricKind::Mean,
        }
    }

    /// Number of units observed: exposures for rate, n for mean.
    pub fn observations(&self) -> u64 {
        match self {
            Self::Rate { exposures, .. } => *exposures,
            Self::Mean { n, .. } => *n,
        }
    }

    /// Whether `newer` is a legal cumulative successor of `self`.
    ///
    /// Rate: exposures and successes must both be non-decreasing and
    /// internally consistent. Mean: n and sum_sq must be non-decreasing
    /// (the raw sum may legitimately move either way for signed values).
    /// A kind change is never legal.
    pub fn accepts(&self, newer: &Self) -> bool {
        match (self, newer) {
            (
                Self::Rate {
                    exposures: e0,
                    successes: s0,
                },
                Self::Rate {
                    exposures: e1,
                    successes: s1,
                },
            ) => e1 >= e0 && s1 >= s0 && s1 <= e1,
            (
                Self::Mean {
                    n: n0, sum_sq: q0, ..
                },
                Self::Mean {
                    n: n1, sum_sq: q1, ..
                },
            ) => n1 >= n0 && *q1 >= *q0,
            _ => false,
        }
    }
}

/// Per-variant, per-metric accumulator snapshot.
///
/// Outer key: variant name. Inner key: metric name. BTreeMap keeps
/// serialization (and therefore input hashing) order-stable.
pub type VariantCounts = BTreeMap<String, BTreeMap<String, MetricAccumulator>>;
