//! Mixture sequential probability-ratio test for mean metrics.
//!
//! A fixed-horizon t-test recomputed on every monitoring tick inflates
//! the false-positive rate; the mixture SPRT is valid under continuous
//! monitoring. Per variant we keep `{n, sum, sum_sq}` and compare the
//! two sample means against a mixing scale derived from the spec's
//! minimum detectable effect.

use crate::contracts::experiment::MetricAccumulator;

use super::EngineError;

/// Sample statistics derived from a mean accumulator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MeanStats {
    n: u64,
    mean: f64,
    variance: f64,
}

impl MeanStats {
    /// Derive statistics, requiring at least two observations so the
    /// sample variance is defined.
    pub(crate) fn from_accumulator(
        variant: &str,
        acc: &MetricAccumulator,
    ) -> Result<Self, EngineError> {
        match *acc {
            MetricAccumulator::Mean { n, sum, sum_sq } => {
                if n < 2 {
                    return Err(EngineError::InsufficientData {
                        variant: variant.to_string(),
                        detail: format!("{n} observations, need at least 2 for a variance"),
                    });
                }
                let nf = n as f64;
                let mean = sum / nf;
                let variance = ((sum_sq - sum * sum / nf) / (nf - 1.0)).max(0.0);
                Ok(Self { n, mean, variance })
            }
            MetricAccumulator::Rate { .. } => Err(EngineError::AccumulatorKindMismatch {
                variant: variant.to_string(),
            }),
        }
    }
}

/// Outcome of one mixture-SPRT evaluation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MsprtOutcome {
    /// Mixture likelihood ratio.
    pub lambda: f64,
    /// Anytime-valid two-sided p-value equivalent, `min(1, 1/lambda)`.
    pub p_equivalent: f64,
    /// Evidence on the same `[0,1]` scale as the rate path: 0.5 is
    /// neutral, values near 1 favor the treatment, near 0 the control.
    pub evidence: f64,
}

/// Evaluate treatment against control.
///
/// `Λ = sqrt(V/(V+τ²)) · exp(τ²d²/(2V(V+τ²)))` with
/// `V = s²_c/n_c + s²_t/n_t`, `d` the observed mean difference and
/// mixing scale `τ = mde·|mean_c|` (plain `mde` when the control mean
/// is zero).
pub(crate) fn evaluate(control: MeanStats, treatment: MeanStats, mde: f64) -> MsprtOutcome {
    let d = treatment.mean - control.mean;
    let v = control.variance / control.n as f64 + treatment.variance / treatment.n as f64;

    if v <= 0.0 {
        // Degenerate data (all observations identical): the likelihood
        // ratio is unbounded for any nonzero difference.
        let evidence = if d > 0.0 {
            1.0
        } else if d < 0.0 {
            0.0
        } else {
            0.5
        };
        return MsprtOutcome {
            lambda: f64::INFINITY,
            p_equivalent: if d == 0.0 { 1.0 } else { 0.0 },
            evidence,
        };
    }

    let tau = if control.mean == 0.0 {
        mde
    } else {
        mde * control.mean.abs()
    };
    let tau_sq = tau * tau;

    let lambda = (v / (v + tau_sq)).sqrt() * (tau_sq * d * d / (2.0 * v * (v + tau_sq))).exp();
    let p_equivalent = (1.0 / lambda).min(1.0);

    let evidence = if d > 0.0 {
        1.0 - p_equivalent / 2.0
    } else if d < 0.0 {
        p_equivalent / 2.0
    } else {
        0.5
    };

    MsprtOutcome {
        lambda,
        p_equivalent,
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_acc(n: u64, mean: f64, variance: f64) -> MetricAccumulator {
        // Build an accumulator whose derived stats land on the target
        // mean and variance: sum = n*mean, sum_sq = (n-1)*var + sum²/n.
        let sum = n as f64 * mean;
        let sum_sq = (n as f64 - 1.0) * variance + sum * sum / n as f64;
        MetricAccumulator::Mean { n, sum, sum_sq }
    }

    fn stats(n: u64, mean: f64, variance: f64) -> MeanStats {
        MeanStats::from_accumulator("v", &mean_acc(n, mean, variance)).unwrap()
    }

    #[test]
    fn stats_round_trip() {
        let s = stats(500, 12.5, 4.0);
        assert_eq!(s.n, 500);
        assert!((s.mean - 12.5).abs() < 1e-9);
        assert!((s.variance - 4.0).abs() < 1e-6);
    }

    #[test]
    fn single_observation_is_insufficient() {
        let acc = MetricAccumulator::Mean {
            n: 1,
            sum: 3.0,
            sum_sq: 9.0,
        };
        let err = MeanStats::from_accumulator("treatment", &acc).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
    }

    #[test]
    fn identical_means_are_neutral() {
        let out = evaluate(stats(1000, 10.0, 4.0), stats(1000, 10.0, 4.0), 0.05);
        assert!((out.evidence - 0.5).abs() < 1e-12);
        assert!((out.p_equivalent - 1.0).abs() < 1e-9);
    }

    #[test]
    fn large_lift_is_strong_evidence() {
        // 10% lift on a tight metric with thousands of observations.
        let out = evaluate(stats(5000, 10.0, 4.0), stats(5000, 11.0, 4.0), 0.05);
        assert!(out.evidence >= 0.95, "evidence = {}", out.evidence);
        assert!(out.lambda > 1.0);
    }

    #[test]
    fn large_drop_mirrors_to_low_evidence() {
        let up = evaluate(stats(5000, 10.0, 4.0), stats(5000, 11.0, 4.0), 0.05);
        let down = evaluate(stats(5000, 11.0, 4.0), stats(5000, 10.0, 4.0), 0.05);
        assert!(down.evidence <= 0.05);
        assert!((up.evidence + down.evidence - 1.0).abs() < 0.05);
    }

    #[test]
    fn small_noisy_sample_stays_inconclusive() {
        let out = evaluate(stats(20, 10.0, 100.0), stats(20, 10.4, 100.0), 0.05);
        assert!(out.evidence > 0.05 && out.evidence < 0.95);
    }

    #[test]
    fn zero_control_mean_falls_back_to_absolute_mde() {
        let out = evaluate(stats(100, 0.0, 1.0), stats(100, 0.5, 1.0), 0.05);
        assert!(out.evidence > 0.5);
    }

    #[test]
    fn rate_accumulator_is_a_kind_mismatch() {
        let acc = MetricAccumulator::Rate {
            exposures: 10,
            successes: 1,
        };
        let err = MeanStats::from_accumulator("control", &acc).unwrap_err();
        assert!(matches!(err, EngineError::AccumulatorKindMismatch { .. }));
    }
}
