//! Monitor consumer.
//!
//! Each job carries a fresh cumulative counts snapshot for one running
//! key. The worker reconciles the snapshot through the state machine,
//! runs the decision engine over the reconciled totals, records the
//! resulting decision event and publishes it. One optimistic save per
//! job; any failure leaves the record as it was.
//!
//! Engine input problems (insufficient data, accumulator shape mismatch)
//! are not worker failures: they surface inside an extend decision event
//! so a stalled experiment still shows its last evaluation. A tick that
//! the state machine rejects (wrong status, counts going backwards)
//! dead-letters, because it signals a coordination bug or a stale
//! report, never something a retry can fix.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use growth_copilot_core::collaborators::DecisionNotifier;
use growth_copilot_core::engine;
use growth_copilot_core::state::{self, ExperimentEvent};
use growth_copilot_core::{DecisionEvent, ExperimentRecord, MonitorJob};

use crate::config::CoordinatorConfig;
use crate::dedup::DedupWindow;
use crate::error::CoordinatorError;
use crate::lock::LeaseManager;
use crate::queue::JobQueue;
use crate::store::RecordStore;
use crate::JobOutcome;

/// Consumer for the Monitor queue.
pub struct MonitorWorker {
    config: CoordinatorConfig,
    store: Arc<dyn RecordStore>,
    leases: Arc<LeaseManager>,
    dedup: Arc<DedupWindow>,
    notifier: Arc<dyn DecisionNotifier>,
}

impl MonitorWorker {
    /// Wire up a worker against its collaborators and infrastructure.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn RecordStore>,
        leases: Arc<LeaseManager>,
        dedup: Arc<DedupWindow>,
        notifier: Arc<dyn DecisionNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            leases,
            dedup,
            notifier,
        }
    }

    /// Drain the queue, handling jobs until it stays empty for one
    /// receive timeout.
    pub async fn run_until_idle(
        &self,
        queue: &dyn JobQueue<MonitorJob>,
    ) -> Result<Vec<JobOutcome>, CoordinatorError> {
        let mut outcomes = Vec::new();
        while let Some(job) = queue.receive(self.config.receive_timeout).await? {
            outcomes.push(self.handle(job, queue).await?);
        }
        Ok(outcomes)
    }

    /// Handle one job: retry transient failures per the policy, then
    /// dead-letter with the reason attached.
    #[instrument(skip_all, fields(key = %job.key, message_id = %job.message_id))]
    pub async fn handle(
        &self,
        job: MonitorJob,
        queue: &dyn JobQueue<MonitorJob>,
    ) -> Result<JobOutcome, CoordinatorError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.process(&job).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_transient() && self.config.retry.allows(attempt) => {
                    let delay = self.config.retry.delay(attempt);
                    warn!(%err, attempt, ?delay, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let reason = err.to_string();
                    warn!(%err, attempt, "dead-lettering monitor job");
                    queue.dead_letter(job, reason.clone()).await?;
                    return Ok(JobOutcome::DeadLettered(reason));
                }
            }
        }
    }

    async fn process(&self, job: &MonitorJob) -> Result<JobOutcome, CoordinatorError> {
        if self.dedup.seen(&job.key, job.message_id).await {
            info!("duplicate delivery, skipping");
            return Ok(JobOutcome::Duplicate);
        }

        let lease = self
            .leases
            .acquire(&job.key, self.config.lock_max_wait)
            .await?;
        let result = self.process_locked(job).await;
        self.leases.release(&lease).await;

        let outcome = result?;
        self.dedup.record(&job.key, job.message_id).await;
        Ok(outcome)
    }

    async fn process_locked(&self, job: &MonitorJob) -> Result<JobOutcome, CoordinatorError> {
        let Some(versioned) = self.store.load(&job.key).await? else {
            return Err(CoordinatorError::RecordNotFound {
                key: job.key.to_string(),
            });
        };
        let mut record = versioned.value;
        let now = Utc::now();

        state::apply(
            &mut record,
            ExperimentEvent::CountsReported {
                variant_counts: job.variant_counts.clone(),
                at: now,
            },
        )?;

        let recommendation =
            match engine::evaluate(&record.spec, &record.cumulative, record.age_days(now)) {
                Ok(recommendation) => recommendation,
                Err(err) => {
                    warn!(%err, "engine could not evaluate this tick");
                    engine::extend_on_error(&err, primary_observations(&record))
                }
            };
        let inputs_hash = DecisionEvent::compute_inputs_hash(&record.cumulative)
            .map_err(|err| CoordinatorError::Transient(format!("hashing counts: {err}")))?;

        let applied = state::apply(
            &mut record,
            ExperimentEvent::DecisionReached {
                recommendation,
                inputs_hash,
                at: now,
            },
        )?;

        if let Some(event) = &applied.decision {
            info!(decision = %event.decision, status = %applied.current, "tick evaluated");
            self.notifier.publish(&job.key, event).await?;
        }
        self.store.save(&job.key, record, versioned.version).await?;
        Ok(JobOutcome::Processed)
    }
}

/// Total primary-metric observations across all variants, for the
/// sample size attached to a fallback extend decision.
fn primary_observations(record: &ExperimentRecord) -> u64 {
    let metric = &record.spec.primary_metric.name;
    record
        .cumulative
        .values()
        .filter_map(|per_metric| per_metric.get(metric))
        .map(|acc| acc.observations())
        .sum()
}
