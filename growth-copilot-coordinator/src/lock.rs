//! Per-key exclusive leases.
//!
//! Exactly one job per experiment key may be in flight at a time, across
//! both queues. A lease is a time-bounded claim: a holder that stalls
//! past the TTL is assumed crashed and its lease is reclaimable by the
//! next acquirer. Reclaim does not make stale writes safe by itself;
//! workers re-validate through the record store's optimistic versioning
//! on save.

use std::collections::HashMap;
use std::time::Duration;

use growth_copilot_core::ExperimentKey;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoordinatorError;

/// A held lease. Release it back through [`LeaseManager::release`];
/// an unreleased lease simply expires after the TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The leased key.
    pub key: ExperimentKey,
    /// Unique claim token; release is a no-op unless it still matches.
    pub token: Uuid,
}

/// In-process lease table.
#[derive(Debug)]
pub struct LeaseManager {
    ttl: Duration,
    held: Mutex<HashMap<ExperimentKey, (Uuid, Instant)>>,
}

impl LeaseManager {
    /// Lease table where claims expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lease for `key`, waiting up to `max_wait` with
    /// backoff while another holder has it.
    pub async fn acquire(
        &self,
        key: &ExperimentKey,
        max_wait: Duration,
    ) -> Result<Lease, CoordinatorError> {
        let started = Instant::now();
        let deadline = started + max_wait;
        let mut delay = Duration::from_millis(10);

        loop {
            {
                let mut held = self.held.lock().await;
                let now = Instant::now();
                match held.get(key) {
                    Some((_, expires)) if *expires > now => {
                        // Still held by a live claim; fall through to wait.
                    }
                    Some(_) => {
                        warn!(key = %key, "reclaiming expired lease");
                        let token = Uuid::new_v4();
                        held.insert(key.clone(), (token, now + self.ttl));
                        return Ok(Lease {
                            key: key.clone(),
                            token,
                        });
                    }
                    None => {
                        let token = Uuid::new_v4();
                        held.insert(key.clone(), (token, now + self.ttl));
                        debug!(key = %key, %token, "lease acquired");
                        return Ok(Lease {
                            key: key.clone(),
                            token,
                        });
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(CoordinatorError::LockTimeout {
                    key: key.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(delay.min(deadline - Instant::now())).await;
            delay = (delay * 2).min(Duration::from_millis(200));
        }
    }

    /// Release a lease. A no-op if the claim already expired and was
    /// reclaimed by someone else.
    pub async fn release(&self, lease: &Lease) {
        let mut held = self.held.lock().await;
        if let Some((token, _)) = held.get(&lease.key) {
            if *token == lease.token {
                held.remove(&lease.key);
                debug!(key = %lease.key, "lease released");
            }
        }
    }

    /// Whether a live claim currently exists for `key`.
    pub async fn is_held(&self, key: &ExperimentKey) -> bool {
        let held = self.held.lock().await;
        matches!(held.get(key), Some((_, expires)) if *expires > Instant::now())
    }
}
