//! `(key, message_id)` delivery deduplication.
//!
//! Queues deliver at-least-once; the dedup window remembers the last N
//! processed deliveries so a redelivery neither double-applies a
//! transition nor double-counts a monitoring tick. A pair is recorded
//! only after its job reached a final outcome, so an interrupted job can
//! be redelivered and handled fresh.

use std::collections::{HashSet, VecDeque};

use growth_copilot_core::ExperimentKey;
use tokio::sync::Mutex;
use uuid::Uuid;

type Entry = (ExperimentKey, Uuid);

/// Sliding window of processed deliveries.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    inner: Mutex<(VecDeque<Entry>, HashSet<Entry>)>,
}

impl DedupWindow {
    /// Window remembering the last `capacity` deliveries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new((VecDeque::new(), HashSet::new())),
        }
    }

    /// Whether this delivery was already processed.
    pub async fn seen(&self, key: &ExperimentKey, message_id: Uuid) -> bool {
        let inner = self.inner.lock().await;
        inner.1.contains(&(key.clone(), message_id))
    }

    /// Record a processed delivery, evicting the oldest past capacity.
    pub async fn record(&self, key: &ExperimentKey, message_id: Uuid) {
        let mut inner = self.inner.lock().await;
        let entry = (key.clone(), message_id);
        if !inner.1.insert(entry.clone()) {
            return;
        }
        inner.0.push_back(entry);
        while inner.0.len() > self.capacity {
            if let Some(evicted) = inner.0.pop_front() {
                inner.1.remove(&evicted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remembers_and_forgets_in_order() {
        let window = DedupWindow::new(2);
        let key = ExperimentKey::from("k");
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        window.record(&key, a).await;
        window.record(&key, b).await;
        assert!(window.seen(&key, a).await);

        // Third entry evicts the oldest.
        window.record(&key, c).await;
        assert!(!window.seen(&key, a).await);
        assert!(window.seen(&key, b).await);
        assert!(window.seen(&key, c).await);
    }

    #[tokio::test]
    async fn same_message_id_differs_per_key() {
        let window = DedupWindow::new(16);
        let id = Uuid::new_v4();
        window.record(&ExperimentKey::from("a"), id).await;
        assert!(!window.seen(&ExperimentKey::from("b"), id).await);
    }
}
