//! Guardrail validator.
//!
//! Deterministic pre-run checks every specification must pass before it
//! may enter the running state. Consumed by the coordinator on intake
//! and exposed to the policy collaborator as the deterministic subset of
//! review. All violated checks are reported together so a single
//! revision cycle can fix everything.

use tracing::instrument;
use validator::Validate;

use crate::contracts::experiment::{ExperimentSpec, MetricKind, MetricSpec};
use crate::engine::inverse_normal_cdf;

/// Property names that must never be tracked. Literal user identifiers
/// are treated the same as direct PII.
pub const PII_DENYLIST: &[&str] = &[
    "email",
    "phone",
    "name",
    "address",
    "user_id",
    "userid",
    "ip",
    "ip_address",
    "ssn",
    "device_id",
];

/// The required false-positive rate. The domain fixes it; any other
/// value is rejected.
pub const REQUIRED_ALPHA: f64 = 0.05;

/// Minimum statistical power.
pub const MIN_POWER: f64 = 0.8;

/// Allowed duration range in days.
pub const DURATION_RANGE: std::ops::RangeInclusive<u32> = 1..=90;

/// Tolerance band on the sample-size check: a stated minimum below 90%
/// of the computed two-arm requirement is rejected.
const SAMPLE_SIZE_TOLERANCE: f64 = 0.9;

/// Outcome of validating one spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Every check passed.
    Valid,
    /// One or more checks failed; all failure reasons, in check order.
    Invalid(Vec<String>),
}

impl ValidationResult {
    /// Whether the spec passed.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The failure reasons, empty when valid.
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid(reasons) => reasons,
        }
    }
}

/// Validate a specification. Pure and deterministic: the same spec
/// always yields the same result.
#[instrument(skip(spec), fields(key = %spec.key))]
pub fn validate(spec: &ExperimentSpec) -> ValidationResult {
    let mut reasons = Vec::new();

    if let Err(errors) = spec.validate() {
        let mut fields: Vec<&str> = errors.errors().keys().copied().collect();
        fields.sort_unstable();
        reasons.push(format!(
            "structural validation failed on: {}",
            fields.join(", ")
        ));
    }

    check_variants(spec, &mut reasons);

    if spec.power < MIN_POWER {
        reasons.push(format!(
            "power must be at least {MIN_POWER}, got {}",
            spec.power
        ));
    }

    if spec.alpha != REQUIRED_ALPHA {
        reasons.push(format!(
            "alpha is fixed at {REQUIRED_ALPHA} for all experiments, got {}",
            spec.alpha
        ));
    }

    if !(spec.mde > 0.0 && spec.mde <= 1.0) {
        reasons.push(format!("mde must be in (0, 1], got {}", spec.mde));
    }

    if spec.min_sample_size == 0 {
        reasons.push("min_sample_size must be positive".to_string());
    }

    check_sample_size(spec, &mut reasons);

    if !DURATION_RANGE.contains(&spec.max_duration_days) {
        reasons.push(format!(
            "max_duration_days must be in [{}, {}], got {}",
            DURATION_RANGE.start(),
            DURATION_RANGE.end(),
            spec.max_duration_days
        ));
    }

    for metric in spec.metrics() {
        check_metric(metric, &mut reasons);
    }

    if reasons.is_empty() {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(reasons)
    }
}

fn check_variants(spec: &ExperimentSpec, reasons: &mut Vec<String>) {
    let mut seen = std::collections::BTreeSet::new();
    let all_distinct = spec.variants.iter().all(|v| seen.insert(v.as_str()));
    if spec.variants.len() < 2 || !all_distinct {
        reasons.push(format!(
            "variants must hold at least 2 distinct names, got {:?}",
            spec.variants
        ));
    }
    if !spec.variants.iter().any(|v| *v == spec.control) {
        reasons.push(format!(
            "designated control '{}' is not among the variants",
            spec.control
        ));
    }
}

/// Required total sample size (both arms) for the spec's parameters,
/// from the standard two-proportion / two-sample normal power formula.
///
/// Rate metrics use the conservative per-arm variance `p(1-p) = 0.25`
/// with `mde` read as an absolute difference in proportions; mean
/// metrics read `mde` as a standardized effect size with unit variance
/// per arm.
pub fn required_sample_size(spec: &ExperimentSpec) -> Option<u64> {
    if !(spec.mde > 0.0 && spec.mde <= 1.0)
        || !(spec.alpha > 0.0 && spec.alpha < 1.0)
        || !(spec.power > 0.0 && spec.power < 1.0)
    {
        return None;
    }

    let z_alpha = inverse_normal_cdf(1.0 - spec.alpha / 2.0);
    let z_power = inverse_normal_cdf(spec.power);
    let z_sum_sq = (z_alpha + z_power).powi(2);

    let per_arm = match spec.primary_metric.kind {
        // Var(p̂_c - p̂_t) with p = 0.5 on both arms: 0.25 + 0.25.
        MetricKind::Rate => z_sum_sq * 0.5 / (spec.mde * spec.mde),
        // Standardized effect, unit variance per arm.
        MetricKind::Mean => z_sum_sq * 2.0 / (spec.mde * spec.mde),
    };

    Some((2.0 * per_arm).ceil() as u64)
}

fn check_sample_size(spec: &ExperimentSpec, reasons: &mut Vec<String>) {
    let Some(required_total) = required_sample_size(spec) else {
        // Parameter problems are already reported by their own checks.
        return;
    };
    let floor = (required_total as f64 * SAMPLE_SIZE_TOLERANCE).ceil() as u64;
    if spec.min_sample_size < floor {
        reasons.push(format!(
            "min_sample_size {} is below the power requirement: mde {} at alpha {} / power {} \
             needs about {} total observations (tolerance floor {})",
            spec.min_sample_size, spec.mde, spec.alpha, spec.power, required_total, floor
        ));
    }
}

fn check_metric(metric: &MetricSpec, reasons: &mut Vec<String>) {
    if metric.event.trim().is_empty() {
        reasons.push(format!("metric '{}' has an empty event name", metric.name));
    }
    if let Some(property) = &metric.property {
        let lowered = property.to_lowercase();
        if PII_DENYLIST.contains(&lowered.as_str()) {
            reasons.push(format!(
                "metric '{}' reads denied property '{}' (PII)",
                metric.name, property
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_spec() -> ExperimentSpec {
        serde_json::from_value(serde_json::json!({
            "key": "checkout_button_color",
            "hypothesis": "Green button converts better",
            "primary_metric": {"name": "conv", "kind": "rate", "event": "checkout_completed"},
            "mde": 0.05,
            "min_sample_size": 4000,
            "max_duration_days": 21,
        }))
        .unwrap()
    }

    #[test]
    fn valid_spec_passes() {
        let result = validate(&valid_spec());
        assert!(result.is_valid(), "reasons: {:?}", result.reasons());
    }

    #[test]
    fn validate_is_deterministic() {
        let spec = valid_spec();
        assert_eq!(validate(&spec), validate(&spec));
    }

    #[test]
    fn empty_hypothesis_fails_structural_validation() {
        let mut spec = valid_spec();
        spec.hypothesis = String::new();
        let result = validate(&spec);
        assert!(
            result.reasons().iter().any(|r| r.contains("structural")),
            "{:?}",
            result.reasons()
        );
    }

    #[test]
    fn wrong_alpha_is_cited() {
        let mut spec = valid_spec();
        spec.alpha = 0.10;
        let result = validate(&spec);
        assert!(!result.is_valid());
        assert!(
            result.reasons().iter().any(|r| r.contains("alpha")),
            "{:?}",
            result.reasons()
        );
    }

    #[test]
    fn low_power_is_rejected() {
        let mut spec = valid_spec();
        spec.power = 0.7;
        let result = validate(&spec);
        assert!(result.reasons().iter().any(|r| r.contains("power")));
    }

    #[test]
    fn undersized_sample_is_rejected() {
        // mde 0.05 requires roughly 3140 total; 2000 is under the 90%
        // tolerance floor.
        let mut spec = valid_spec();
        spec.min_sample_size = 2000;
        let result = validate(&spec);
        assert!(
            result
                .reasons()
                .iter()
                .any(|r| r.contains("min_sample_size")),
            "{:?}",
            result.reasons()
        );
    }

    #[test]
    fn required_sample_size_rate_magnitude() {
        let spec = valid_spec();
        let required = required_sample_size(&spec).unwrap();
        // (1.96 + 0.8416)^2 * 0.5 / 0.0025 ≈ 1570 per arm.
        assert!((3000..3300).contains(&required), "required = {required}");
    }

    #[test]
    fn mean_metrics_need_more_data_at_same_mde() {
        let mut spec = valid_spec();
        spec.primary_metric.kind = MetricKind::Mean;
        let rate_required = required_sample_size(&valid_spec()).unwrap();
        let mean_required = required_sample_size(&spec).unwrap();
        assert!(mean_required > rate_required);
    }

    #[test]
    fn pii_property_is_rejected() {
        let mut spec = valid_spec();
        spec.primary_metric.property = Some("Email".to_string());
        let result = validate(&spec);
        assert!(result.reasons().iter().any(|r| r.contains("PII")));
    }

    #[test]
    fn empty_event_is_rejected() {
        let mut spec = valid_spec();
        spec.secondary_metrics.push(MetricSpec {
            name: "aov".into(),
            kind: MetricKind::Mean,
            event: "  ".into(),
            property: Some("amount".into()),
        });
        let result = validate(&spec);
        assert!(result.reasons().iter().any(|r| r.contains("empty event")));
    }

    #[test]
    fn all_violations_reported_together() {
        let mut spec = valid_spec();
        spec.alpha = 0.10;
        spec.power = 0.5;
        spec.max_duration_days = 180;
        spec.primary_metric.property = Some("user_id".to_string());
        let result = validate(&spec);
        assert!(result.reasons().len() >= 4, "{:?}", result.reasons());
    }

    #[test]
    fn duplicate_variants_are_rejected() {
        let mut spec = valid_spec();
        spec.variants = vec!["control".into(), "control".into()];
        let result = validate(&spec);
        assert!(result.reasons().iter().any(|r| r.contains("distinct")));
    }
}
