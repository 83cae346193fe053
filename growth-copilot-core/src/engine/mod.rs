//! Statistical decision engine.
//!
//! Pure functions over cumulative counts: no I/O, no state, no
//! sampling. Given a spec, a counts snapshot and the experiment age,
//! [`evaluate`] returns a [`Recommendation`] (ship the treatment, ship
//! the control, extend, or stop) with the evidence value, the sample
//! size it was based on, a rationale and a risk note. Identical inputs
//! always produce identical output.
//!
//! Two analysis paths, selected by the primary metric's kind:
//! Beta-Binomial posterior comparison for rate metrics ([`beta`]),
//! mixture SPRT for mean metrics ([`msprt`]). Both map onto one
//! `[0, 1]` evidence scale so the decision policy below applies
//! uniformly.

mod beta;
mod msprt;
mod numeric;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::contracts::decision_event::Decision;
use crate::contracts::experiment::{ExperimentSpec, MetricAccumulator, MetricKind, VariantCounts};

pub(crate) use numeric::inverse_normal_cdf;

/// Evidence at or above this ships the treatment (inclusive).
pub const SHIP_THRESHOLD: f64 = 0.95;

/// Evidence at or below this ships the control (inclusive).
pub const STOP_THRESHOLD: f64 = 0.05;

/// Total sample size at which a conclusive result may ship even before
/// `min_sample_size` is reached (early-stopping exception).
pub const EARLY_STOP_SAMPLE: u64 = 5000;

/// Engine input problems. These never crash a worker; the coordinator
/// surfaces them inside an extend decision event instead.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    /// A variant named by the spec is missing from the counts snapshot.
    #[error("variant '{variant}' missing from counts snapshot")]
    MissingVariant {
        /// The absent variant.
        variant: String,
    },

    /// Too little data to derive the statistic.
    #[error("insufficient data for variant '{variant}': {detail}")]
    InsufficientData {
        /// The underpowered variant.
        variant: String,
        /// What exactly is missing.
        detail: String,
    },

    /// The snapshot carries an accumulator of the wrong shape for the
    /// primary metric's kind.
    #[error("accumulator kind mismatch for variant '{variant}'")]
    AccumulatorKindMismatch {
        /// The offending variant.
        variant: String,
    },
}

/// The engine's output for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The decision.
    pub decision: Decision,

    /// Evidence that the treatment outperforms the control, in `[0,1]`.
    pub evidence: f64,

    /// Certainty behind the decision: `evidence`, or `1 - evidence`
    /// for a ship-control decision.
    pub confidence: f64,

    /// Total sample size across both compared arms.
    pub sample_size: u64,

    /// Human-readable explanation.
    pub rationale: String,

    /// Chance and impact of the opposite conclusion being true.
    pub risk_note: String,
}

/// Evaluate the primary metric of `spec` over `counts` and apply the
/// decision policy.
///
/// `age_days` is the time since launch, used only for the timeout stop.
#[instrument(skip(spec, counts), fields(key = %spec.key, metric = %spec.primary_metric.name))]
pub fn evaluate(
    spec: &ExperimentSpec,
    counts: &VariantCounts,
    age_days: f64,
) -> Result<Recommendation, EngineError> {
    let treatment_name = spec.treatment().ok_or_else(|| EngineError::MissingVariant {
        variant: "treatment".to_string(),
    })?;

    let control = primary_accumulator(spec, counts, &spec.control)?;
    let treatment = primary_accumulator(spec, counts, treatment_name)?;

    let (evidence, sample_size) = match spec.primary_metric.kind {
        MetricKind::Rate => {
            let (s_c, n_c) = rate_counts(&spec.control, control)?;
            let (s_t, n_t) = rate_counts(treatment_name, treatment)?;
            let evidence = beta::prob_treatment_beats_control(s_c, n_c, s_t, n_t);
            (evidence, n_c + n_t)
        }
        MetricKind::Mean => {
            let c = msprt::MeanStats::from_accumulator(&spec.control, control)?;
            let t = msprt::MeanStats::from_accumulator(treatment_name, treatment)?;
            let outcome = msprt::evaluate(c, t, spec.mde);
            (
                outcome.evidence,
                control.observations() + treatment.observations(),
            )
        }
    };

    debug!(evidence, sample_size, age_days, "evidence computed");
    Ok(decide(spec, evidence, sample_size, age_days))
}

fn primary_accumulator<'a>(
    spec: &ExperimentSpec,
    counts: &'a VariantCounts,
    variant: &str,
) -> Result<&'a MetricAccumulator, EngineError> {
    counts
        .get(variant)
        .and_then(|per_metric| per_metric.get(&spec.primary_metric.name))
        .ok_or_else(|| EngineError::MissingVariant {
            variant: variant.to_string(),
        })
}

fn rate_counts(variant: &str, acc: &MetricAccumulator) -> Result<(u64, u64), EngineError> {
    match *acc {
        MetricAccumulator::Rate {
            exposures,
            successes,
        } => Ok((successes, exposures)),
        MetricAccumulator::Mean { .. } => Err(EngineError::AccumulatorKindMismatch {
            variant: variant.to_string(),
        }),
    }
}

/// Apply the decision policy to an evidence value.
///
/// Thresholds are inclusive: evidence exactly at 0.95 or 0.05 counts as
/// conclusive. A conclusive result ships once the total sample size
/// reaches `min_sample_size`, or [`EARLY_STOP_SAMPLE`] under the
/// early-stopping exception. An inconclusive experiment past its
/// maximum duration stops with a timeout rationale, distinct from a
/// negative-result stop.
pub fn decide(
    spec: &ExperimentSpec,
    evidence: f64,
    sample_size: u64,
    age_days: f64,
) -> Recommendation {
    let conclusive_up = evidence >= SHIP_THRESHOLD;
    let conclusive_down = evidence <= STOP_THRESHOLD;
    let gate_met = sample_size >= spec.min_sample_size || sample_size >= EARLY_STOP_SAMPLE;
    let early = sample_size < spec.min_sample_size;

    if conclusive_up && gate_met {
        let rationale = if early {
            format!(
                "strong evidence treatment outperforms control (P = {evidence:.3}) with \
                 {sample_size} observations; early stop past {EARLY_STOP_SAMPLE} users"
            )
        } else {
            format!(
                "strong evidence treatment outperforms control (P = {evidence:.3}) with \
                 {sample_size} observations"
            )
        };
        return Recommendation {
            decision: Decision::ShipTreatment,
            evidence,
            confidence: evidence,
            sample_size,
            rationale,
            risk_note: format!(
                "probability control is actually better: {:.3}; shipping would then forgo \
                 roughly the stated minimum detectable effect",
                1.0 - evidence
            ),
        };
    }

    if conclusive_down && gate_met {
        let rationale = if early {
            format!(
                "strong evidence control outperforms treatment (P = {:.3}) with \
                 {sample_size} observations; early stop past {EARLY_STOP_SAMPLE} users",
                1.0 - evidence
            )
        } else {
            format!(
                "strong evidence control outperforms treatment (P = {:.3}) with \
                 {sample_size} observations",
                1.0 - evidence
            )
        };
        return Recommendation {
            decision: Decision::ShipControl,
            evidence,
            confidence: 1.0 - evidence,
            sample_size,
            rationale,
            risk_note: format!(
                "probability treatment is actually better: {evidence:.3}; reverting would \
                 then forgo a real improvement"
            ),
        };
    }

    if age_days >= spec.max_duration_days as f64 {
        let rationale = if conclusive_up || conclusive_down {
            format!(
                "timeout: {age_days:.1} days elapsed (max {}) with conclusive evidence \
                 (P = {evidence:.3}) but only {sample_size} observations, under the sample gate",
                spec.max_duration_days
            )
        } else {
            format!(
                "timeout: {age_days:.1} days elapsed (max {}) without conclusive evidence \
                 (P = {evidence:.3})",
                spec.max_duration_days
            )
        };
        return Recommendation {
            decision: Decision::Stop,
            evidence,
            confidence: 0.5,
            sample_size,
            rationale,
            risk_note: if conclusive_up || conclusive_down {
                "evidence was decisive but the sample never reached the stated minimum; \
                 treat the direction as suggestive only"
                    .to_string()
            } else {
                "inconclusive at timeout; either arm may be marginally better, the \
                 observed effect was too small to resolve in the allotted duration"
                    .to_string()
            },
        };
    }

    Recommendation {
        decision: Decision::Extend,
        evidence,
        confidence: 0.5,
        sample_size,
        rationale: format!(
            "inconclusive (P = {evidence:.3}) at {sample_size} of {} minimum observations",
            spec.min_sample_size
        ),
        risk_note: "continuing collection; no ship risk is taken while extended".to_string(),
    }
}

/// Fallback recommendation when the engine cannot run over a tick's
/// inputs. Surfaces the error inside the decision event instead of
/// crashing the worker.
pub fn extend_on_error(error: &EngineError, sample_size: u64) -> Recommendation {
    Recommendation {
        decision: Decision::Extend,
        evidence: 0.5,
        confidence: 0.5,
        sample_size,
        rationale: format!("analysis not possible on this tick: {error}"),
        risk_note: "no decision taken; counts retained for the next tick".to_string(),
    }
}
