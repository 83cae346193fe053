//! New-Experiment consumer.
//!
//! Takes a raw idea or a drafted spec through the pre-run pipeline:
//! drafting, guardrail validation, policy review, implementation and
//! launch, finishing with the first monitor job enqueued. All lifecycle
//! transitions for one job are applied to a working copy and persisted
//! in a single optimistic save; a failed job leaves the record exactly
//! as it was.
//!
//! Guardrail and policy rejections are domain outcomes, not failures:
//! the record lands in a resubmittable state carrying the structured
//! reasons, and the job completes normally.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use growth_copilot_core::collaborators::{
    DraftingPipeline, Implementer, PolicyReviewer, PolicyVerdict,
};
use growth_copilot_core::contracts::experiment::MetricAccumulator;
use growth_copilot_core::guardrail::{self, ValidationResult};
use growth_copilot_core::state::{self, ExperimentEvent, TransitionError};
use growth_copilot_core::{
    ExperimentKey, ExperimentRecord, ExperimentSpec, ExperimentStatus, IntakePayload, MonitorJob,
    NewExperimentJob, VariantCounts,
};

use crate::config::CoordinatorConfig;
use crate::dedup::DedupWindow;
use crate::error::CoordinatorError;
use crate::lock::LeaseManager;
use crate::queue::JobQueue;
use crate::store::RecordStore;
use crate::JobOutcome;

/// Consumer for the New-Experiment queue.
pub struct IntakeWorker {
    config: CoordinatorConfig,
    store: Arc<dyn RecordStore>,
    leases: Arc<LeaseManager>,
    dedup: Arc<DedupWindow>,
    drafting: Arc<dyn DraftingPipeline>,
    policy: Arc<dyn PolicyReviewer>,
    implementer: Arc<dyn Implementer>,
    monitor_queue: Arc<dyn JobQueue<MonitorJob>>,
}

impl IntakeWorker {
    /// Wire up a worker against its collaborators and infrastructure.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn RecordStore>,
        leases: Arc<LeaseManager>,
        dedup: Arc<DedupWindow>,
        drafting: Arc<dyn DraftingPipeline>,
        policy: Arc<dyn PolicyReviewer>,
        implementer: Arc<dyn Implementer>,
        monitor_queue: Arc<dyn JobQueue<MonitorJob>>,
    ) -> Self {
        Self {
            config,
            store,
            leases,
            dedup,
            drafting,
            policy,
            implementer,
            monitor_queue,
        }
    }

    /// Drain the queue, handling jobs until it stays empty for one
    /// receive timeout.
    pub async fn run_until_idle(
        &self,
        queue: &dyn JobQueue<NewExperimentJob>,
    ) -> Result<Vec<JobOutcome>, CoordinatorError> {
        let mut outcomes = Vec::new();
        while let Some(job) = queue.receive(self.config.receive_timeout).await? {
            outcomes.push(self.handle(job, queue).await?);
        }
        Ok(outcomes)
    }

    /// Handle one job: retry transient failures per the policy, then
    /// dead-letter with the reason attached. Never alters the record on
    /// failure.
    #[instrument(skip_all, fields(message_id = %job.message_id))]
    pub async fn handle(
        &self,
        job: NewExperimentJob,
        queue: &dyn JobQueue<NewExperimentJob>,
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
                    warn!(%err, attempt, "dead-lettering intake job");
                    queue.dead_letter(job, reason.clone()).await?;
                    return Ok(JobOutcome::DeadLettered(reason));
                }
            }
        }
    }

    async fn process(&self, job: &NewExperimentJob) -> Result<JobOutcome, CoordinatorError> {
        let spec = match &job.payload {
            IntakePayload::IdeaText { idea_text } => self.drafting.draft(idea_text).await?,
            IntakePayload::DraftSpec { spec } => (**spec).clone(),
        };
        let key = spec.key.clone();

        if self.dedup.seen(&key, job.message_id).await {
            info!(key = %key, "duplicate delivery, skipping");
            return Ok(JobOutcome::Duplicate);
        }

        let lease = self.leases.acquire(&key, self.config.lock_max_wait).await?;
        let result = self.process_locked(&key, spec).await;
        self.leases.release(&lease).await;

        let outcome = result?;
        self.dedup.record(&key, job.message_id).await;
        Ok(outcome)
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn process_locked(
        &self,
        key: &ExperimentKey,
        spec: ExperimentSpec,
    ) -> Result<JobOutcome, CoordinatorError> {
        let existing = self.store.load(key).await?;

        if let ValidationResult::Invalid(reasons) = guardrail::validate(&spec) {
            info!(count = reasons.len(), "guardrail rejected spec");
            match existing {
                // Persist the draft with its reasons so the requester
                // can query why, then wait for a revision.
                None => {
                    let mut record = ExperimentRecord::new(spec, Utc::now());
                    record.rejection_reasons = reasons.clone();
                    self.store.save(key, record, 0).await?;
                }
                // A revised spec that still fails replaces the parked
                // draft, so a status query reflects the latest attempt.
                Some(versioned) if versioned.value.status == ExperimentStatus::Draft => {
                    let mut record = versioned.value;
                    record.spec = spec;
                    record.rejection_reasons = reasons.clone();
                    record.updated_at = Utc::now();
                    self.store.save(key, record, versioned.version).await?;
                }
                Some(_) => {}
            }
            return Ok(JobOutcome::Rejected(reasons));
        }

        let (mut record, expected_version) = match existing {
            None => {
                let mut record = ExperimentRecord::new(spec, Utc::now());
                state::apply(&mut record, ExperimentEvent::SpecDesigned)?;
                (record, 0)
            }
            Some(versioned) => {
                let mut record = versioned.value;
                match record.status {
                    // A prior guardrail failure left the record in
                    // draft; retry with the revised spec, same revision.
                    ExperimentStatus::Draft => {
                        record.spec = spec;
                        record.rejection_reasons.clear();
                        state::apply(&mut record, ExperimentEvent::SpecDesigned)?;
                    }
                    ExperimentStatus::PolicyRejected => {
                        state::apply(
                            &mut record,
                            ExperimentEvent::Resubmitted {
                                spec: Box::new(spec),
                            },
                        )?;
                    }
                    status => {
                        return Err(TransitionError::Illegal {
                            from: status,
                            event: "resubmitted",
                        }
                        .into());
                    }
                }
                (record, versioned.version)
            }
        };

        state::apply(&mut record, ExperimentEvent::PolicySubmitted)?;
        match self.policy.review(&record.spec).await? {
            PolicyVerdict::Rejected(reasons) => {
                info!(count = reasons.len(), "policy rejected spec");
                state::apply(
                    &mut record,
                    ExperimentEvent::PolicyRejected {
                        reasons: reasons.clone(),
                    },
                )?;
                self.store.save(key, record, expected_version).await?;
                return Ok(JobOutcome::Rejected(reasons));
            }
            PolicyVerdict::Approved => {
                state::apply(&mut record, ExperimentEvent::PolicyApproved)?;
            }
        }

        self.implementer.implement(&record.spec).await?;
        state::apply(&mut record, ExperimentEvent::ImplementationComplete)?;
        state::apply(&mut record, ExperimentEvent::Launched { at: Utc::now() })?;

        let first_tick = MonitorJob {
            message_id: Uuid::new_v4(),
            key: key.clone(),
            variant_counts: zero_counts(&record.spec),
        };
        self.store.save(key, record, expected_version).await?;
        self.monitor_queue.publish(first_tick).await?;
        info!("experiment launched");
        Ok(JobOutcome::Processed)
    }
}

/// Empty accumulators for every declared variant and metric; the first
/// monitor evaluation over these is a neutral extend.
fn zero_counts(spec: &ExperimentSpec) -> VariantCounts {
    let mut counts = VariantCounts::new();
    for variant in &spec.variants {
        let per_metric = spec
            .metrics()
            .map(|metric| (metric.name.clone(), MetricAccumulator::empty(metric.kind)))
            .collect();
        counts.insert(variant.clone(), per_metric);
    }
    counts
}
