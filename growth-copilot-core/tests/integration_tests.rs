//! End-to-end lifecycle tests over the pure core: guardrail, state
//! machine and decision engine composed the way a worker would compose
//! them, with no queues or collaborators involved.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use growth_copilot_core::engine;
use growth_copilot_core::guardrail;
use growth_copilot_core::state::{apply, ExperimentEvent};
use growth_copilot_core::{
    Decision, DecisionEvent, ExperimentRecord, ExperimentSpec, ExperimentStatus,
    MetricAccumulator, VariantCounts,
};

fn rate_spec() -> ExperimentSpec {
    serde_json::from_value(serde_json::json!({
        "key": "checkout-cta-color",
        "hypothesis": "a high-contrast CTA lifts checkout conversion",
        "primary_metric": {"name": "conversion", "kind": "rate", "event": "purchase_completed"},
        "mde": 0.05,
        "min_sample_size": 4000,
        "max_duration_days": 21,
    }))
    .unwrap()
}

fn rate_counts(s_c: u64, n_c: u64, s_t: u64, n_t: u64) -> VariantCounts {
    let mut counts = VariantCounts::new();
    for (variant, s, n) in [("control", s_c, n_c), ("treatment", s_t, n_t)] {
        let mut per_metric = BTreeMap::new();
        per_metric.insert(
            "conversion".to_string(),
            MetricAccumulator::Rate {
                exposures: n,
                successes: s,
            },
        );
        counts.insert(variant.to_string(), per_metric);
    }
    counts
}

fn launch(record: &mut ExperimentRecord) {
    for event in [
        ExperimentEvent::SpecDesigned,
        ExperimentEvent::PolicySubmitted,
        ExperimentEvent::PolicyApproved,
        ExperimentEvent::ImplementationComplete,
        ExperimentEvent::Launched { at: Utc::now() },
    ] {
        apply(record, event).unwrap();
    }
}

/// One monitoring tick: reconcile counts, evaluate, record the decision.
fn tick(record: &mut ExperimentRecord, counts: VariantCounts, age_days: f64) -> Decision {
    let at = Utc::now();
    apply(
        record,
        ExperimentEvent::CountsReported {
            variant_counts: counts,
            at,
        },
    )
    .unwrap();
    let recommendation = engine::evaluate(&record.spec, &record.cumulative, age_days).unwrap();
    let inputs_hash = DecisionEvent::compute_inputs_hash(&record.cumulative).unwrap();
    let decision = recommendation.decision;
    apply(
        record,
        ExperimentEvent::DecisionReached {
            recommendation,
            inputs_hash,
            at,
        },
    )
    .unwrap();
    decision
}

#[test]
fn full_lifecycle_ships_a_clear_winner() {
    let spec = rate_spec();
    assert!(guardrail::validate(&spec).is_valid());

    let mut record = ExperimentRecord::new(spec, Utc::now());
    launch(&mut record);

    // Early inconclusive tick extends.
    assert_eq!(
        tick(&mut record, rate_counts(40, 500, 52, 500), 1.0),
        Decision::Extend
    );
    assert_eq!(record.status, ExperimentStatus::Running);

    // A clearly separated result at full sample ships.
    assert_eq!(
        tick(&mut record, rate_counts(400, 5000, 520, 5000), 7.0),
        Decision::ShipTreatment
    );
    assert_eq!(record.status, ExperimentStatus::Decided);
    assert_eq!(record.decision_history.len(), 2);

    apply(&mut record, ExperimentEvent::RolloutFinalized).unwrap();
    assert_eq!(record.status, ExperimentStatus::Shipped);
    assert!(record.status.is_terminal());
}

#[test]
fn close_race_times_out_into_stop() {
    let mut record = ExperimentRecord::new(rate_spec(), Utc::now());
    launch(&mut record);

    assert_eq!(
        tick(&mut record, rate_counts(480, 5000, 520, 5000), 3.0),
        Decision::Extend
    );
    // Same close race past max duration stops inconclusively.
    assert_eq!(
        tick(&mut record, rate_counts(960, 10_000, 1040, 10_000), 22.0),
        Decision::Stop
    );
    assert_eq!(record.status, ExperimentStatus::Stopped);
    let last = record.last_decision().unwrap();
    assert!(last.rationale.contains("timeout"));
}

#[test]
fn decision_events_carry_the_counts_hash() {
    let mut record = ExperimentRecord::new(rate_spec(), Utc::now());
    launch(&mut record);
    tick(&mut record, rate_counts(480, 5000, 520, 5000), 3.0);

    let event = record.last_decision().unwrap();
    assert_eq!(event.inputs_hash.len(), 64);
    assert_eq!(
        event.inputs_hash,
        DecisionEvent::compute_inputs_hash(&record.cumulative).unwrap()
    );
    assert_eq!(event.revision, 1);
    assert_eq!(event.sample_size, 10_000);
}

#[test]
fn identical_snapshots_yield_identical_recommendations() {
    let spec = rate_spec();
    let counts = rate_counts(480, 5000, 520, 5000);
    let a = engine::evaluate(&spec, &counts, 3.0).unwrap();
    let b = engine::evaluate(&spec, &counts, 3.0).unwrap();
    assert_eq!(a, b);
    assert_eq!(
        DecisionEvent::compute_inputs_hash(&counts).unwrap(),
        DecisionEvent::compute_inputs_hash(&rate_counts(480, 5000, 520, 5000)).unwrap()
    );
}

#[test]
fn rejected_spec_resubmits_as_a_fresh_revision() {
    let mut record = ExperimentRecord::new(rate_spec(), Utc::now());
    apply(&mut record, ExperimentEvent::SpecDesigned).unwrap();
    apply(&mut record, ExperimentEvent::PolicySubmitted).unwrap();
    apply(
        &mut record,
        ExperimentEvent::PolicyRejected {
            reasons: vec!["urgency framing risks a dark pattern".to_string()],
        },
    )
    .unwrap();

    let mut revised = rate_spec();
    revised.hypothesis = "a clearer CTA label lifts checkout conversion".to_string();
    apply(
        &mut record,
        ExperimentEvent::Resubmitted {
            spec: Box::new(revised.clone()),
        },
    )
    .unwrap();

    assert_eq!(record.revision, 2);
    assert_eq!(record.spec.hypothesis, revised.hypothesis);
    assert!(record.cumulative.is_empty());
    assert_eq!(record.prior_revisions.len(), 1);

    // The new revision runs to completion independently.
    apply(&mut record, ExperimentEvent::PolicySubmitted).unwrap();
    apply(&mut record, ExperimentEvent::PolicyApproved).unwrap();
    apply(&mut record, ExperimentEvent::ImplementationComplete).unwrap();
    apply(&mut record, ExperimentEvent::Launched { at: Utc::now() }).unwrap();
    assert_eq!(
        tick(&mut record, rate_counts(400, 5000, 520, 5000), 5.0),
        Decision::ShipTreatment
    );
    assert_eq!(record.last_decision().unwrap().revision, 2);
}

#[test]
fn stale_counts_never_reach_the_engine() {
    let mut record = ExperimentRecord::new(rate_spec(), Utc::now());
    launch(&mut record);
    tick(&mut record, rate_counts(480, 5000, 520, 5000), 3.0);

    let stale = apply(
        &mut record,
        ExperimentEvent::CountsReported {
            variant_counts: rate_counts(100, 1000, 110, 1000),
            at: Utc::now(),
        },
    );
    assert!(stale.is_err());
    // Stored counts still reflect the last accepted tick.
    assert_eq!(
        record.cumulative["treatment"]["conversion"],
        MetricAccumulator::Rate {
            exposures: 5000,
            successes: 520
        }
    );
}

#[test]
fn guardrail_rejection_is_complete_and_deterministic() {
    let mut spec = rate_spec();
    spec.alpha = 0.1;
    spec.min_sample_size = 100;
    spec.primary_metric.property = Some("email".to_string());

    let first = guardrail::validate(&spec);
    let second = guardrail::validate(&spec);
    assert_eq!(first, second);
    let reasons = first.reasons();
    assert!(reasons.len() >= 3, "{reasons:?}");
}

#[test]
fn record_age_tracks_launch_not_creation() {
    let created = Utc::now() - Duration::days(30);
    let mut record = ExperimentRecord::new(rate_spec(), created);
    assert_eq!(record.age_days(Utc::now()), 0.0);
    launch(&mut record);
    let age = record.age_days(Utc::now());
    assert!(age < 1.0, "{age}");
}
