//! Queue message shapes.
//!
//! Logical payloads for the two coordinator queues. The broker is a
//! deployment choice; these types only fix what a job must carry:
//! a unique `message_id` (idempotency handle) plus the work itself.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::experiment::{ExperimentKey, ExperimentSpec, VariantCounts};

/// What an intake job carries: either a raw idea to be drafted, or an
/// already-drafted spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakePayload {
    /// Free-text experiment idea for the drafting collaborator.
    IdeaText {
        /// The idea as submitted.
        idea_text: String,
    },
    /// A pre-drafted specification, skipping the drafting step.
    DraftSpec {
        /// The spec to intake.
        spec: Box<ExperimentSpec>,
    },
}

/// Job on the New-Experiment queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExperimentJob {
    /// Unique delivery identifier, the dedup handle.
    pub message_id: Uuid,

    /// Idea or draft spec.
    pub payload: IntakePayload,

    /// Who asked for the experiment.
    pub requester: String,
}

/// Job on the Monitor queue: a fresh cumulative counts snapshot for one
/// running experiment, enqueued by the external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorJob {
    /// Unique delivery identifier, the dedup handle.
    pub message_id: Uuid,

    /// Experiment under monitoring.
    pub key: ExperimentKey,

    /// Authoritative cumulative totals per variant and metric.
    pub variant_counts: VariantCounts,
}
