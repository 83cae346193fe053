//! Seams for the non-deterministic collaborators.
//!
//! Drafting, policy review, implementation and decision publication all
//! involve systems outside this crate (LLM pipelines, human reviewers,
//! flag services, analytics sinks). The core talks to them through these
//! traits only; workers decide retry versus dead-letter from the error
//! class.

use async_trait::async_trait;
use thiserror::Error;

use crate::contracts::decision_event::DecisionEvent;
use crate::contracts::experiment::{ExperimentKey, ExperimentSpec};

/// Failure of a collaborator call.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator is temporarily unreachable; retrying may help.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered but could not fulfil the request.
    #[error("collaborator failed: {0}")]
    Failed(String),
}

impl CollaboratorError {
    /// Whether the caller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Outcome of a policy review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// The spec may proceed to implementation.
    Approved,
    /// The spec is rejected, with structured reasons.
    Rejected(Vec<String>),
}

/// Turns a free-text growth idea into a structured experiment spec.
#[async_trait]
pub trait DraftingPipeline: Send + Sync {
    /// Draft a spec from an idea.
    async fn draft(&self, idea_text: &str) -> Result<ExperimentSpec, CollaboratorError>;
}

/// Reviews a spec for policy compliance.
#[async_trait]
pub trait PolicyReviewer: Send + Sync {
    /// Review the spec. A rejection is a verdict, not an error.
    async fn review(&self, spec: &ExperimentSpec) -> Result<PolicyVerdict, CollaboratorError>;
}

/// Wires up flags and instrumentation for an approved spec.
#[async_trait]
pub trait Implementer: Send + Sync {
    /// Implement the experiment; completion implies it is launchable.
    async fn implement(&self, spec: &ExperimentSpec) -> Result<(), CollaboratorError>;
}

/// Publishes decision events to downstream consumers.
#[async_trait]
pub trait DecisionNotifier: Send + Sync {
    /// Publish one decision event.
    async fn publish(
        &self,
        key: &ExperimentKey,
        event: &DecisionEvent,
    ) -> Result<(), CollaboratorError>;
}
