//! Experiment lifecycle state machine.
//!
//! The only legal way to mutate an [`ExperimentRecord`]. Transitions are
//! whitelisted by current status; anything else fails with
//! [`TransitionError::Illegal`] carrying both the current status and the
//! attempted event: reported, never silently ignored, because an
//! unexpected event signals a coordination bug such as a monitoring tick
//! arriving before implementation completed.
//!
//! Counter reconciliation: incoming monitoring counts are authoritative
//! cumulative totals. A tick is applied only if every accumulator is a
//! legal successor of what is stored; a single regression rejects the
//! whole tick and leaves the record untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::contracts::decision_event::{Decision, DecisionEvent};
use crate::contracts::experiment::{ExperimentSpec, VariantCounts};
use crate::contracts::record::{ExperimentRecord, ExperimentStatus, RevisionSnapshot};
use crate::engine::Recommendation;

/// Events that drive the lifecycle.
#[derive(Debug, Clone)]
pub enum ExperimentEvent {
    /// The drafted spec passed the guardrail validator.
    SpecDesigned,
    /// The spec was sent to the policy collaborator.
    PolicySubmitted,
    /// Policy approval arrived.
    PolicyApproved,
    /// Policy rejection arrived, with structured reasons.
    PolicyRejected {
        /// Why the policy collaborator rejected the spec.
        reasons: Vec<String>,
    },
    /// A revised spec was resubmitted for a policy-rejected key.
    Resubmitted {
        /// The new revision's spec.
        spec: Box<ExperimentSpec>,
    },
    /// The implementation collaborator finished instrumenting.
    ImplementationComplete,
    /// The experiment went live.
    Launched {
        /// Launch time; the timeout clock starts here.
        at: DateTime<Utc>,
    },
    /// A monitoring tick reported fresh cumulative counts.
    CountsReported {
        /// Authoritative cumulative totals.
        variant_counts: VariantCounts,
        /// Tick time.
        at: DateTime<Utc>,
    },
    /// The decision engine evaluated the current counts.
    DecisionReached {
        /// The engine's output.
        recommendation: Recommendation,
        /// Hash of the counts snapshot that was evaluated.
        inputs_hash: String,
        /// Evaluation time.
        at: DateTime<Utc>,
    },
    /// The rollout for a ship decision was finalized externally.
    RolloutFinalized,
}

impl ExperimentEvent {
    /// Short event name for errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpecDesigned => "spec_designed",
            Self::PolicySubmitted => "policy_submitted",
            Self::PolicyApproved => "policy_approved",
            Self::PolicyRejected { .. } => "policy_rejected",
            Self::Resubmitted { .. } => "resubmitted",
            Self::ImplementationComplete => "implementation_complete",
            Self::Launched { .. } => "launched",
            Self::CountsReported { .. } => "counts_reported",
            Self::DecisionReached { .. } => "decision_reached",
            Self::RolloutFinalized => "rollout_finalized",
        }
    }
}

/// Transition failures. The record is left untouched in every case.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The event is not whitelisted for the record's current status.
    #[error("event '{event}' is illegal in status '{from}'")]
    Illegal {
        /// Status at the time of the attempt.
        from: ExperimentStatus,
        /// The attempted event.
        event: &'static str,
    },

    /// A reported cumulative total went backwards, indicating a stale or
    /// out-of-order report; applying it would corrupt the audit trail.
    #[error("non-monotonic counts for variant '{variant}' metric '{metric}'")]
    NonMonotonic {
        /// Variant whose counts regressed.
        variant: String,
        /// Metric whose counts regressed.
        metric: String,
    },

    /// A tick referenced a variant the spec does not declare.
    #[error("counts reported for undeclared variant '{variant}'")]
    UnknownVariant {
        /// The undeclared variant.
        variant: String,
    },

    /// Rollout finalization with no ship decision on record.
    #[error("rollout finalized without a preceding ship decision")]
    NoShipDecision,
}

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Status before the event.
    pub previous: ExperimentStatus,
    /// Status after the event.
    pub current: ExperimentStatus,
    /// Decision event appended by this transition, if any.
    pub decision: Option<DecisionEvent>,
}

/// Apply one event to the record.
///
/// On error the record is guaranteed unchanged; callers retry, reject or
/// dead-letter the driving job without compensation logic.
#[instrument(skip(record, event), fields(key = %record.spec.key, status = %record.status, event = event.name()))]
pub fn apply(
    record: &mut ExperimentRecord,
    event: ExperimentEvent,
) -> Result<Applied, TransitionError> {
    use ExperimentStatus as S;

    let previous = record.status;
    let illegal = |event: &ExperimentEvent| TransitionError::Illegal {
        from: previous,
        event: event.name(),
    };

    let mut decision = None;
    let now = Utc::now();

    let current = match (previous, &event) {
        (S::Draft, ExperimentEvent::SpecDesigned) => S::Designed,
        (S::Designed, ExperimentEvent::PolicySubmitted) => S::PolicyPending,
        (S::PolicyPending, ExperimentEvent::PolicyApproved) => S::PolicyApproved,
        (S::PolicyPending, ExperimentEvent::PolicyRejected { reasons }) => {
            record.rejection_reasons = reasons.clone();
            S::PolicyRejected
        }
        (S::PolicyRejected, ExperimentEvent::Resubmitted { spec }) => {
            let closed = RevisionSnapshot {
                revision: record.revision,
                spec: std::mem::replace(&mut record.spec, (**spec).clone()),
                rejection_reasons: std::mem::take(&mut record.rejection_reasons),
                closed_at: now,
            };
            record.prior_revisions.push(closed);
            record.revision += 1;
            record.cumulative.clear();
            record.launched_at = None;
            info!(revision = record.revision, "revision reopened");
            S::Designed
        }
        (S::PolicyApproved, ExperimentEvent::ImplementationComplete) => S::Implemented,
        (S::Implemented, ExperimentEvent::Launched { at }) => {
            record.launched_at = Some(*at);
            S::Running
        }
        (S::Running, ExperimentEvent::CountsReported { variant_counts, at }) => {
            reconcile(record, variant_counts)?;
            record.updated_at = *at;
            record.status = S::Running;
            return Ok(Applied {
                previous,
                current: S::Running,
                decision: None,
            });
        }
        (
            S::Running,
            ExperimentEvent::DecisionReached {
                recommendation,
                inputs_hash,
                at,
            },
        ) => {
            let event = decision_event(record, recommendation, inputs_hash.clone(), *at);
            info!(
                decision = %event.decision,
                confidence = %event.confidence,
                sample_size = event.sample_size,
                "decision recorded"
            );
            let next = match recommendation.decision {
                Decision::ShipTreatment | Decision::ShipControl => S::Decided,
                Decision::Extend => S::Running,
                Decision::Stop => S::Stopped,
            };
            record.decision_history.push(event.clone());
            decision = Some(event);
            next
        }
        (S::Decided, ExperimentEvent::RolloutFinalized) => {
            match record.last_decision().map(|e| e.decision) {
                Some(Decision::ShipTreatment) => S::Shipped,
                Some(Decision::ShipControl) => S::Reverted,
                _ => return Err(TransitionError::NoShipDecision),
            }
        }
        _ => {
            warn!("illegal transition attempted");
            return Err(illegal(&event));
        }
    };

    record.status = current;
    record.updated_at = now;
    Ok(Applied {
        previous,
        current,
        decision,
    })
}

/// Replace stored accumulators with the incoming cumulative totals,
/// validating monotonicity first. All-or-nothing: validation of every
/// accumulator happens before any write.
fn reconcile(
    record: &mut ExperimentRecord,
    incoming: &VariantCounts,
) -> Result<(), TransitionError> {
    for (variant, per_metric) in incoming {
        if !record.spec.variants.iter().any(|v| v == variant) {
            return Err(TransitionError::UnknownVariant {
                variant: variant.clone(),
            });
        }
        for (metric, acc) in per_metric {
            if let Some(stored) = record
                .cumulative
                .get(variant)
                .and_then(|m| m.get(metric))
            {
                if !stored.accepts(acc) {
                    warn!(%variant, %metric, "rejecting non-monotonic counts");
                    return Err(TransitionError::NonMonotonic {
                        variant: variant.clone(),
                        metric: metric.clone(),
                    });
                }
            }
        }
    }

    for (variant, per_metric) in incoming {
        let slot = record.cumulative.entry(variant.clone()).or_default();
        for (metric, acc) in per_metric {
            slot.insert(metric.clone(), *acc);
        }
    }
    Ok(())
}

fn decision_event(
    record: &ExperimentRecord,
    recommendation: &Recommendation,
    inputs_hash: String,
    at: DateTime<Utc>,
) -> DecisionEvent {
    DecisionEvent {
        id: Uuid::new_v4(),
        key: record.spec.key.clone(),
        revision: record.revision,
        decision: recommendation.decision,
        confidence: Decimal::try_from(recommendation.confidence).unwrap_or_default(),
        sample_size: recommendation.sample_size,
        rationale: recommendation.rationale.clone(),
        risk_note: recommendation.risk_note.clone(),
        inputs_hash,
        timestamp: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::experiment::MetricAccumulator;
    use std::collections::BTreeMap;

    fn spec() -> ExperimentSpec {
        serde_json::from_value(serde_json::json!({
            "key": "k",
            "hypothesis": "h",
            "primary_metric": {"name": "conv", "kind": "rate", "event": "purchase"},
        }))
        .unwrap()
    }

    fn running_record() -> ExperimentRecord {
        let mut record = ExperimentRecord::new(spec(), Utc::now());
        for event in [
            ExperimentEvent::SpecDesigned,
            ExperimentEvent::PolicySubmitted,
            ExperimentEvent::PolicyApproved,
            ExperimentEvent::ImplementationComplete,
            ExperimentEvent::Launched { at: Utc::now() },
        ] {
            apply(&mut record, event).unwrap();
        }
        record
    }

    fn counts(exposures: u64, successes: u64) -> VariantCounts {
        let mut out = VariantCounts::new();
        for variant in ["control", "treatment"] {
            let mut per_metric = BTreeMap::new();
            per_metric.insert(
                "conv".to_string(),
                MetricAccumulator::Rate {
                    exposures,
                    successes,
                },
            );
            out.insert(variant.to_string(), per_metric);
        }
        out
    }

    fn extend_recommendation() -> Recommendation {
        Recommendation {
            decision: Decision::Extend,
            evidence: 0.5,
            confidence: 0.5,
            sample_size: 100,
            rationale: "inconclusive".into(),
            risk_note: "none".into(),
        }
    }

    #[test]
    fn happy_path_reaches_running() {
        let record = running_record();
        assert_eq!(record.status, ExperimentStatus::Running);
        assert!(record.launched_at.is_some());
    }

    #[test]
    fn monitor_tick_in_draft_is_illegal() {
        let mut record = ExperimentRecord::new(spec(), Utc::now());
        let err = apply(
            &mut record,
            ExperimentEvent::CountsReported {
                variant_counts: counts(10, 1),
                at: Utc::now(),
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: ExperimentStatus::Draft,
                event: "counts_reported",
            }
        );
        assert_eq!(record.status, ExperimentStatus::Draft);
    }

    #[test]
    fn counts_reconcile_is_monotonic() {
        let mut record = running_record();
        apply(
            &mut record,
            ExperimentEvent::CountsReported {
                variant_counts: counts(100, 10),
                at: Utc::now(),
            },
        )
        .unwrap();

        // Strictly greater totals are always applied.
        apply(
            &mut record,
            ExperimentEvent::CountsReported {
                variant_counts: counts(150, 12),
                at: Utc::now(),
            },
        )
        .unwrap();

        // A stale snapshot is rejected and nothing changes.
        let before = record.cumulative.clone();
        let err = apply(
            &mut record,
            ExperimentEvent::CountsReported {
                variant_counts: counts(120, 11),
                at: Utc::now(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::NonMonotonic { .. }));
        assert_eq!(record.cumulative, before);
    }

    #[test]
    fn equal_totals_are_accepted() {
        // Re-reporting identical cumulative totals is not a regression.
        let mut record = running_record();
        for _ in 0..2 {
            apply(
                &mut record,
                ExperimentEvent::CountsReported {
                    variant_counts: counts(100, 10),
                    at: Utc::now(),
                },
            )
            .unwrap();
        }
    }

    #[test]
    fn undeclared_variant_is_rejected() {
        let mut record = running_record();
        let mut bad = counts(10, 1);
        let inner = bad.remove("treatment").unwrap();
        bad.insert("treatment_b".to_string(), inner);
        let err = apply(
            &mut record,
            ExperimentEvent::CountsReported {
                variant_counts: bad,
                at: Utc::now(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::UnknownVariant { .. }));
    }

    #[test]
    fn extend_loops_in_running() {
        let mut record = running_record();
        let applied = apply(
            &mut record,
            ExperimentEvent::DecisionReached {
                recommendation: extend_recommendation(),
                inputs_hash: "0".repeat(64),
                at: Utc::now(),
            },
        )
        .unwrap();
        assert_eq!(applied.current, ExperimentStatus::Running);
        assert_eq!(record.decision_history.len(), 1);
    }

    #[test]
    fn ship_decision_then_rollout_finalize() {
        let mut record = running_record();
        let mut rec = extend_recommendation();
        rec.decision = Decision::ShipTreatment;
        rec.confidence = 0.97;
        apply(
            &mut record,
            ExperimentEvent::DecisionReached {
                recommendation: rec,
                inputs_hash: "0".repeat(64),
                at: Utc::now(),
            },
        )
        .unwrap();
        assert_eq!(record.status, ExperimentStatus::Decided);
        assert_eq!(
            record.last_decision().unwrap().confidence,
            rust_decimal_macros::dec!(0.97)
        );

        apply(&mut record, ExperimentEvent::RolloutFinalized).unwrap();
        assert_eq!(record.status, ExperimentStatus::Shipped);
    }

    #[test]
    fn ship_control_reverts() {
        let mut record = running_record();
        let mut rec = extend_recommendation();
        rec.decision = Decision::ShipControl;
        apply(
            &mut record,
            ExperimentEvent::DecisionReached {
                recommendation: rec,
                inputs_hash: "0".repeat(64),
                at: Utc::now(),
            },
        )
        .unwrap();
        apply(&mut record, ExperimentEvent::RolloutFinalized).unwrap();
        assert_eq!(record.status, ExperimentStatus::Reverted);
    }

    #[test]
    fn stop_is_terminal() {
        let mut record = running_record();
        let mut rec = extend_recommendation();
        rec.decision = Decision::Stop;
        apply(
            &mut record,
            ExperimentEvent::DecisionReached {
                recommendation: rec,
                inputs_hash: "0".repeat(64),
                at: Utc::now(),
            },
        )
        .unwrap();
        assert_eq!(record.status, ExperimentStatus::Stopped);

        let err = apply(
            &mut record,
            ExperimentEvent::CountsReported {
                variant_counts: counts(1000, 100),
                at: Utc::now(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
    }

    #[test]
    fn rejected_revision_cannot_run_but_a_new_one_can() {
        let mut record = ExperimentRecord::new(spec(), Utc::now());
        apply(&mut record, ExperimentEvent::SpecDesigned).unwrap();
        apply(&mut record, ExperimentEvent::PolicySubmitted).unwrap();
        apply(
            &mut record,
            ExperimentEvent::PolicyRejected {
                reasons: vec!["dark pattern risk".into()],
            },
        )
        .unwrap();
        assert_eq!(record.status, ExperimentStatus::PolicyRejected);

        // No path from the rejected revision toward running.
        for event in [
            ExperimentEvent::PolicyApproved,
            ExperimentEvent::ImplementationComplete,
            ExperimentEvent::Launched { at: Utc::now() },
        ] {
            assert!(apply(&mut record, event).is_err());
        }

        // A resubmission opens revision 2 and retains the history.
        apply(
            &mut record,
            ExperimentEvent::Resubmitted {
                spec: Box::new(spec()),
            },
        )
        .unwrap();
        assert_eq!(record.revision, 2);
        assert_eq!(record.status, ExperimentStatus::Designed);
        assert_eq!(record.prior_revisions.len(), 1);
        assert_eq!(
            record.prior_revisions[0].rejection_reasons,
            vec!["dark pattern risk".to_string()]
        );
    }
}
