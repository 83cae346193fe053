//! Deterministic variant assignment.
//!
//! A user's bucket is a pure function of the experiment key and the user
//! id, so any process that knows the spec assigns identically with no
//! shared state and no persistence.

use sha2::{Digest, Sha256};

use crate::contracts::experiment::ExperimentSpec;

/// Number of hash buckets the [0, 1) assignment space is divided into.
pub const BUCKET_SPACE: u64 = 10_000;

/// Deterministic bucket for a user within an experiment.
///
/// Hashes `"{key}:{user_id}"` with SHA-256 and folds the first eight
/// bytes (big-endian) into the bucket space.
pub fn bucket_for(experiment_key: &str, user_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_key.as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % BUCKET_SPACE
}

/// Assign a user to one of the spec's variants.
///
/// The bucket space is split into `variants.len()` contiguous slices of
/// equal width, in declared variant order; a trailing remainder of
/// `BUCKET_SPACE % variants.len()` buckets falls to the last variant.
/// Returns `None` when the spec declares no variants.
pub fn assign_variant<'a>(spec: &'a ExperimentSpec, user_id: &str) -> Option<&'a str> {
    if spec.variants.is_empty() {
        return None;
    }
    let bucket = bucket_for(spec.key.as_str(), user_id);
    let width = BUCKET_SPACE / spec.variants.len() as u64;
    let index = ((bucket / width) as usize).min(spec.variants.len() - 1);
    Some(&spec.variants[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(variants: &[&str]) -> ExperimentSpec {
        serde_json::from_value(serde_json::json!({
            "key": "checkout-cta",
            "hypothesis": "h",
            "variants": variants,
            "primary_metric": {"name": "conv", "kind": "rate", "event": "purchase"},
        }))
        .unwrap()
    }

    #[test]
    fn assignment_is_stable() {
        let spec = spec(&["control", "treatment"]);
        let first = assign_variant(&spec, "user-42").unwrap().to_string();
        for _ in 0..10 {
            assert_eq!(assign_variant(&spec, "user-42").unwrap(), first);
        }
    }

    #[test]
    fn different_experiments_bucket_independently() {
        // The same user must not land in the same bucket across keys.
        let collisions = (0..200)
            .filter(|i| {
                let user = format!("user-{i}");
                bucket_for("exp-a", &user) == bucket_for("exp-b", &user)
            })
            .count();
        assert!(collisions < 5, "got {collisions} collisions");
    }

    #[test]
    fn split_is_roughly_even() {
        let spec = spec(&["control", "treatment"]);
        let treatment = (0..2000)
            .filter(|i| assign_variant(&spec, &format!("user-{i}")) == Some("treatment"))
            .count();
        // Binomial(2000, 0.5): five sigma is ~112.
        assert!((880..=1120).contains(&treatment), "treatment={treatment}");
    }

    #[test]
    fn three_way_split_covers_all_variants() {
        let spec = spec(&["control", "blue", "green"]);
        let mut seen = std::collections::BTreeSet::new();
        for i in 0..500 {
            seen.insert(assign_variant(&spec, &format!("user-{i}")).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn no_variants_yields_none() {
        let spec = spec(&[]);
        assert_eq!(assign_variant(&spec, "user-1"), None);
    }

    #[test]
    fn boundary_buckets_map_to_last_variant() {
        // 10_000 % 3 leaves one remainder bucket that must still resolve.
        let spec = spec(&["a", "b", "c"]);
        for i in 0..2000 {
            assert!(assign_variant(&spec, &format!("user-{i}")).is_some());
        }
    }
}
