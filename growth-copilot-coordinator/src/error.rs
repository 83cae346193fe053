//! Coordinator failure taxonomy.
//!
//! The split that matters operationally is transient versus terminal:
//! transient failures are retried with backoff, terminal ones dead-letter
//! the job. In both cases the record is untouched: a job's transitions
//! are applied to a working copy and persisted in one optimistic save.

use growth_copilot_core::collaborators::CollaboratorError;
use growth_copilot_core::state::TransitionError;
use thiserror::Error;

/// Failures surfaced while handling one job.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The per-key lease could not be acquired within the bounded wait.
    #[error("timed out acquiring lease for key '{key}' after {waited_ms} ms")]
    LockTimeout {
        /// The contended key.
        key: String,
        /// How long the worker waited.
        waited_ms: u64,
    },

    /// A transient infrastructure failure (queue, store).
    #[error("transient failure: {0}")]
    Transient(String),

    /// The record changed under the worker between load and save. The
    /// worker re-reads and retries.
    #[error("record version conflict for key '{key}'")]
    VersionConflict {
        /// The contended key.
        key: String,
    },

    /// A monitor job referenced a key with no record.
    #[error("no record for key '{key}'")]
    RecordNotFound {
        /// The unknown key.
        key: String,
    },

    /// The job asked for a transition the state machine forbids:
    /// a coordination bug or out-of-order delivery, never retried.
    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),

    /// An external collaborator call failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl CoordinatorError {
    /// Whether retrying with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LockTimeout { .. } | Self::Transient(_) | Self::VersionConflict { .. } => true,
            Self::Collaborator(inner) => inner.is_transient(),
            Self::RecordNotFound { .. } | Self::IllegalTransition(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use growth_copilot_core::ExperimentStatus;

    #[test]
    fn transience_classification() {
        assert!(CoordinatorError::LockTimeout {
            key: "k".into(),
            waited_ms: 5000
        }
        .is_transient());
        assert!(CoordinatorError::VersionConflict { key: "k".into() }.is_transient());
        assert!(
            CoordinatorError::Collaborator(CollaboratorError::Unavailable("503".into()))
                .is_transient()
        );
        assert!(
            !CoordinatorError::Collaborator(CollaboratorError::Failed("bad input".into()))
                .is_transient()
        );
        assert!(!CoordinatorError::IllegalTransition(TransitionError::Illegal {
            from: ExperimentStatus::Draft,
            event: "counts_reported",
        })
        .is_transient());
    }
}
