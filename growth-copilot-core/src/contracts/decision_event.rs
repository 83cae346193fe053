//! Decision events.
//!
//! Every monitoring evaluation appends exactly one [`DecisionEvent`] to
//! the owning record's audit trail. Events are append-only and never
//! deleted; the `inputs_hash` ties each event back to the exact counts
//! snapshot that produced it, so a decision can always be re-derived and
//! verified.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::experiment::ExperimentKey;

/// The decision reached by one monitoring evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Strong evidence the treatment outperforms the control.
    ShipTreatment,
    /// Strong evidence the control outperforms the treatment.
    ShipControl,
    /// Inconclusive, keep collecting data.
    Extend,
    /// Stop without shipping (timeout or safety).
    Stop,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShipTreatment => f.write_str("ship_treatment"),
            Self::ShipControl => f.write_str("ship_control"),
            Self::Extend => f.write_str("extend"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// One entry in an experiment's append-only decision audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    /// Unique event id.
    pub id: Uuid,

    /// Experiment the event belongs to.
    pub key: ExperimentKey,

    /// Spec revision that was being monitored.
    pub revision: u32,

    /// Decision reached.
    pub decision: Decision,

    /// Certainty behind the decision: the evidence value, or its
    /// complement for a ship-control decision. In `[0, 1]`.
    pub confidence: Decimal,

    /// Total sample size the decision was based on.
    pub sample_size: u64,

    /// Human-readable explanation of the decision.
    pub rationale: String,

    /// Estimated chance and impact of the opposite conclusion being true.
    pub risk_note: String,

    /// SHA-256 of the counts snapshot the engine evaluated, for
    /// determinism verification.
    pub inputs_hash: String,

    /// Event creation time.
    pub timestamp: DateTime<Utc>,
}

impl DecisionEvent {
    /// SHA-256 hash of any serializable input, hex encoded.
    ///
    /// Re-hashing the same snapshot always yields the same digest, which
    /// is what makes a recorded decision independently checkable.
    pub fn compute_inputs_hash<T: Serialize>(inputs: &T) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(inputs)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn inputs_hash_is_deterministic() {
        let mut counts = BTreeMap::new();
        counts.insert("control", (5000u64, 480u64));
        counts.insert("treatment", (5000u64, 520u64));

        let first = DecisionEvent::compute_inputs_hash(&counts).unwrap();
        let second = DecisionEvent::compute_inputs_hash(&counts).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, second);
    }

    #[test]
    fn decision_serializes_snake_case() {
        let json = serde_json::to_string(&Decision::ShipTreatment).unwrap();
        assert_eq!(json, "\"ship_treatment\"");
    }
}
