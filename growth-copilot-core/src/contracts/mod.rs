//! Contract types shared across the platform.
//!
//! These schemas are the single source of truth for everything that
//! crosses a component boundary: experiment specifications produced by
//! the drafting collaborator, lifecycle records owned by the state
//! machine, decision events emitted for the audit trail, and the queue
//! message shapes consumed by the coordinator.

pub mod decision_event;
pub mod experiment;
pub mod messages;
pub mod record;

pub use decision_event::{Decision, DecisionEvent};
pub use experiment::{
    ExperimentKey, ExperimentSpec, MetricAccumulator, MetricKind, MetricSpec, VariantCounts,
};
pub use messages::{IntakePayload, MonitorJob, NewExperimentJob};
pub use record::{ExperimentRecord, ExperimentStatus, RevisionSnapshot};
