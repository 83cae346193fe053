//! The experiment lifecycle record.
//!
//! [`ExperimentRecord`] is the mutable entity that tracks one experiment
//! key from intake to a terminal state. It is owned exclusively by the
//! state machine in [`crate::state`]: the coordinator never mutates its
//! fields directly, only through `apply`, and only while holding the
//! key's lease.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision_event::DecisionEvent;
use super::experiment::{ExperimentSpec, VariantCounts};

/// Lifecycle stage of an experiment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Spec drafted, guardrails not yet confirmed.
    Draft,
    /// Guardrails passed, awaiting policy submission.
    Designed,
    /// Submitted to the policy collaborator.
    PolicyPending,
    /// Approved by policy, awaiting implementation.
    PolicyApproved,
    /// Rejected by policy. Terminal for the revision; a resubmission
    /// opens a new revision under the same key.
    PolicyRejected,
    /// Instrumentation implemented, awaiting launch.
    Implemented,
    /// Live and being monitored.
    Running,
    /// A ship decision was reached; rollout not yet finalized.
    Decided,
    /// Treatment shipped. Terminal.
    Shipped,
    /// Control shipped (treatment rolled back). Terminal.
    Reverted,
    /// Stopped without shipping. Terminal.
    Stopped,
}

impl ExperimentStatus {
    /// Whether the record can never be processed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Shipped | Self::Reverted | Self::Stopped)
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Designed => "designed",
            Self::PolicyPending => "policy_pending",
            Self::PolicyApproved => "policy_approved",
            Self::PolicyRejected => "policy_rejected",
            Self::Implemented => "implemented",
            Self::Running => "running",
            Self::Decided => "decided",
            Self::Shipped => "shipped",
            Self::Reverted => "reverted",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Frozen remains of a policy-rejected revision, kept when the key is
/// resubmitted as a new revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionSnapshot {
    /// Revision number that was closed.
    pub revision: u32,
    /// The rejected spec.
    pub spec: ExperimentSpec,
    /// Reasons given by the policy collaborator.
    pub rejection_reasons: Vec<String>,
    /// When the revision was closed.
    pub closed_at: DateTime<Utc>,
}

/// The mutable lifecycle entity for one experiment key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Current spec (latest revision).
    pub spec: ExperimentSpec,

    /// Revision number, starting at 1. Incremented only by resubmission
    /// after a policy rejection.
    pub revision: u32,

    /// Current lifecycle stage.
    pub status: ExperimentStatus,

    /// Record creation time (first intake).
    pub created_at: DateTime<Utc>,

    /// Last mutation time.
    pub updated_at: DateTime<Utc>,

    /// Launch time of the current revision, set on entering Running.
    /// Experiment age for the timeout check is measured from here.
    pub launched_at: Option<DateTime<Utc>>,

    /// Cumulative per-variant, per-metric counts for the current
    /// revision. Monotone; replaced only by accepted monitoring ticks.
    pub cumulative: VariantCounts,

    /// Append-only decision audit trail, across all revisions.
    pub decision_history: Vec<DecisionEvent>,

    /// Reasons attached to the current revision's policy rejection,
    /// empty otherwise.
    pub rejection_reasons: Vec<String>,

    /// Closed prior revisions of this key.
    pub prior_revisions: Vec<RevisionSnapshot>,
}

impl ExperimentRecord {
    /// Create a fresh record for a drafted spec, in `Draft`.
    pub fn new(spec: ExperimentSpec, now: DateTime<Utc>) -> Self {
        Self {
            spec,
            revision: 1,
            status: ExperimentStatus::Draft,
            created_at: now,
            updated_at: now,
            launched_at: None,
            cumulative: VariantCounts::new(),
            decision_history: Vec::new(),
            rejection_reasons: Vec::new(),
            prior_revisions: Vec::new(),
        }
    }

    /// The most recent decision event, if any.
    pub fn last_decision(&self) -> Option<&DecisionEvent> {
        self.decision_history.last()
    }

    /// Experiment age in days at `now`, measured from launch. Zero when
    /// the revision has not launched.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        match self.launched_at {
            Some(launched) => (now - launched).num_seconds().max(0) as f64 / 86_400.0,
            None => 0.0,
        }
    }
}
