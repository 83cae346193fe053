//! Growth Experiment Co-Pilot: deterministic core.
//!
//! This crate is the trustworthy backbone of the experiment automation
//! platform: typed contracts for experiment specifications and lifecycle
//! records, the guardrail validator that gates every spec before it may
//! run, the statistical decision engine that turns cumulative per-variant
//! counts into ship/stop/extend recommendations, and the lifecycle state
//! machine that enforces valid transitions.
//!
//! Everything here is pure and deterministic: no I/O, no clocks beyond
//! timestamps passed in by callers, no sampling. The non-deterministic
//! collaborators (spec drafting, policy review, implementation, analytics,
//! notification) are reached only through the trait contracts in
//! [`collaborators`]; the queue-driven worker loops that drive this core
//! live in the companion `growth-copilot-coordinator` crate.
//!
//! # Modules
//!
//! - [`contracts`]: ExperimentSpec, ExperimentRecord, DecisionEvent and
//!   queue message shapes
//! - [`guardrail`]: pre-run statistical and privacy checks
//! - [`engine`]: Beta-Binomial and mSPRT decision engine
//! - [`state`]: lifecycle state machine
//! - [`bucketing`]: deterministic variant assignment
//! - [`collaborators`]: external collaborator contracts

#![warn(missing_docs)]

pub mod bucketing;
pub mod collaborators;
pub mod contracts;
pub mod engine;
pub mod guardrail;
pub mod state;

pub use contracts::decision_event::{Decision, DecisionEvent};
pub use contracts::experiment::{
    ExperimentKey, ExperimentSpec, MetricAccumulator, MetricKind, MetricSpec, VariantCounts,
};
pub use contracts::messages::{IntakePayload, MonitorJob, NewExperimentJob};
pub use contracts::record::{ExperimentRecord, ExperimentStatus, RevisionSnapshot};
pub use engine::{EngineError, Recommendation};
pub use guardrail::{validate, ValidationResult};
pub use state::{ExperimentEvent, TransitionError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
