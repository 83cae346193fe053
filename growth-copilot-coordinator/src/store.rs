//! Persisted experiment records with optimistic versioning.
//!
//! Writers hold the key's lease; the version check on save is the second
//! line of defense, catching a write from a worker whose lease expired
//! and was reclaimed mid-job. Readers may load without a lease and must
//! tolerate eventually-consistent state mid-transition.

use std::collections::HashMap;

use async_trait::async_trait;
use growth_copilot_core::{ExperimentKey, ExperimentRecord};
use tokio::sync::Mutex;

use crate::error::CoordinatorError;

/// A record plus the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    /// The stored value.
    pub value: T,
    /// Monotonic version, bumped on every successful save.
    pub version: u64,
}

/// Record persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load the record for `key`, if one exists.
    async fn load(
        &self,
        key: &ExperimentKey,
    ) -> Result<Option<Versioned<ExperimentRecord>>, CoordinatorError>;

    /// Save `record` if the stored version still equals
    /// `expected_version` (`0` means "create, must not exist").
    /// Returns the new version; fails with a version conflict otherwise.
    async fn save(
        &self,
        key: &ExperimentKey,
        record: ExperimentRecord,
        expected_version: u64,
    ) -> Result<u64, CoordinatorError>;

    /// All stored keys, for status listings.
    async fn keys(&self) -> Result<Vec<ExperimentKey>, CoordinatorError>;
}

/// In-process store backing tests and the offline simulation.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<ExperimentKey, Versioned<ExperimentRecord>>>,
}

impl InMemoryRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn load(
        &self,
        key: &ExperimentKey,
    ) -> Result<Option<Versioned<ExperimentRecord>>, CoordinatorError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn save(
        &self,
        key: &ExperimentKey,
        record: ExperimentRecord,
        expected_version: u64,
    ) -> Result<u64, CoordinatorError> {
        let mut records = self.records.lock().await;
        let current = records.get(key).map(|v| v.version).unwrap_or(0);
        if current != expected_version {
            return Err(CoordinatorError::VersionConflict {
                key: key.to_string(),
            });
        }
        let version = current + 1;
        records.insert(
            key.clone(),
            Versioned {
                value: record,
                version,
            },
        );
        Ok(version)
    }

    async fn keys(&self) -> Result<Vec<ExperimentKey>, CoordinatorError> {
        let mut keys: Vec<_> = self.records.lock().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
