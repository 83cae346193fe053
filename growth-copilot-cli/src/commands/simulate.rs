//! Offline pipeline simulation
//!
//! Runs intake and monitoring in-process against in-memory queues and
//! stub collaborators: ideas are drafted into a default spec, policy
//! always approves, implementation is a no-op. Monitor ticks are
//! synthesized from fixed per-variant conversion rates, so the whole
//! run is deterministic and needs no broker or analytics platform.
//!
//! ```bash
//! growth-copilot simulate --idea "shorter signup form" \
//!     --control-rate 0.10 --treatment-rate 0.12 --ticks 5
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::Args;
use uuid::Uuid;

use growth_copilot_coordinator::{
    CoordinatorConfig, DedupWindow, InMemoryQueue, InMemoryRecordStore, IntakeWorker, JobOutcome,
    JobQueue, LeaseManager, MonitorWorker, RecordStore, RetryPolicy,
};
use growth_copilot_core::collaborators::{
    CollaboratorError, DecisionNotifier, DraftingPipeline, Implementer, PolicyReviewer,
    PolicyVerdict,
};
use growth_copilot_core::{
    DecisionEvent, ExperimentKey, ExperimentSpec, ExperimentStatus, IntakePayload,
    MetricAccumulator, MetricKind, MonitorJob, NewExperimentJob, VariantCounts,
};

use crate::output::{print_field, print_section, print_structured, OutputFormat};

use super::parse_spec;

/// Run the full pipeline in-process with stub collaborators.
#[derive(Debug, Args)]
pub struct SimulateCommand {
    /// Experiment spec file; skips the drafting step
    #[arg(long, conflicts_with = "idea")]
    pub spec: Option<PathBuf>,

    /// Free-text idea for the stub drafting pipeline
    #[arg(long)]
    pub idea: Option<String>,

    /// True conversion rate simulated for the control arm
    #[arg(long, default_value_t = 0.10)]
    pub control_rate: f64,

    /// True conversion rate simulated for the treatment arm
    #[arg(long, default_value_t = 0.12)]
    pub treatment_rate: f64,

    /// Number of monitor ticks to synthesize
    #[arg(long, default_value_t = 5)]
    pub ticks: u32,

    /// New users entering the experiment per tick (split across arms)
    #[arg(long, default_value_t = 2000)]
    pub users_per_tick: u64,
}

struct SlugDrafting;

#[async_trait]
impl DraftingPipeline for SlugDrafting {
    async fn draft(&self, idea_text: &str) -> Result<ExperimentSpec, CollaboratorError> {
        let spec = serde_json::from_value(serde_json::json!({
            "key": slug(idea_text),
            "hypothesis": idea_text,
            "primary_metric": {
                "name": "conversion",
                "kind": "rate",
                "event": "conversion",
            },
            "min_sample_size": 4000,
        }))
        .map_err(|err| CollaboratorError::Failed(err.to_string()))?;
        Ok(spec)
    }
}

struct ApproveAll;

#[async_trait]
impl PolicyReviewer for ApproveAll {
    async fn review(&self, _spec: &ExperimentSpec) -> Result<PolicyVerdict, CollaboratorError> {
        Ok(PolicyVerdict::Approved)
    }
}

struct NoopImplementer;

#[async_trait]
impl Implementer for NoopImplementer {
    async fn implement(&self, _spec: &ExperimentSpec) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[derive(Default)]
struct CollectingNotifier {
    events: tokio::sync::Mutex<Vec<DecisionEvent>>,
}

#[async_trait]
impl DecisionNotifier for CollectingNotifier {
    async fn publish(
        &self,
        _key: &ExperimentKey,
        event: &DecisionEvent,
    ) -> Result<(), CollaboratorError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

fn simulated_counts(
    spec: &ExperimentSpec,
    control_rate: f64,
    treatment_rate: f64,
    exposures_per_arm: u64,
) -> Result<VariantCounts> {
    let treatment = spec
        .treatment()
        .context("Spec declares no treatment variant")?
        .to_string();
    let metric = spec.primary_metric.name.clone();

    let mut counts = VariantCounts::new();
    for (variant, rate) in [
        (spec.control.clone(), control_rate),
        (treatment, treatment_rate),
    ] {
        let successes = ((exposures_per_arm as f64) * rate).round() as u64;
        let mut per_metric = BTreeMap::new();
        per_metric.insert(
            metric.clone(),
            MetricAccumulator::Rate {
                exposures: exposures_per_arm,
                successes: successes.min(exposures_per_arm),
            },
        );
        counts.insert(variant, per_metric);
    }
    Ok(counts)
}

pub async fn execute(format: OutputFormat, cmd: SimulateCommand) -> Result<()> {
    let payload = match (&cmd.spec, &cmd.idea) {
        (Some(path), _) => {
            let spec = parse_spec(&std::fs::read_to_string(path).with_context(|| {
                format!("Failed to read spec file: {}", path.display())
            })?)?;
            if spec.primary_metric.kind != MetricKind::Rate {
                anyhow::bail!("Simulation synthesizes rate counts only");
            }
            IntakePayload::DraftSpec {
                spec: Box::new(spec),
            }
        }
        (None, Some(idea)) => IntakePayload::IdeaText {
            idea_text: idea.clone(),
        },
        (None, None) => anyhow::bail!("Either --spec or --idea must be provided"),
    };

    let config = CoordinatorConfig {
        receive_timeout: Duration::from_millis(50),
        retry: RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(10),
            max: Duration::from_millis(100),
        },
        ..CoordinatorConfig::default()
    };
    let store = Arc::new(InMemoryRecordStore::new());
    let leases = Arc::new(LeaseManager::new(config.lease_ttl));
    let dedup = Arc::new(DedupWindow::new(config.dedup_window));
    let intake_queue = Arc::new(InMemoryQueue::new());
    let monitor_queue = Arc::new(InMemoryQueue::new());
    let notifier = Arc::new(CollectingNotifier::default());

    let intake = IntakeWorker::new(
        config.clone(),
        store.clone(),
        leases.clone(),
        dedup.clone(),
        Arc::new(SlugDrafting),
        Arc::new(ApproveAll),
        Arc::new(NoopImplementer),
        monitor_queue.clone(),
    );
    let monitor = MonitorWorker::new(config, store.clone(), leases, dedup, notifier.clone());

    intake_queue
        .publish(NewExperimentJob {
            message_id: Uuid::new_v4(),
            payload,
            requester: "simulate".to_string(),
        })
        .await
        .map_err(|err| anyhow::anyhow!("enqueue failed: {err}"))?;
    let outcomes = intake
        .run_until_idle(intake_queue.as_ref())
        .await
        .map_err(|err| anyhow::anyhow!("intake failed: {err}"))?;
    if let Some(JobOutcome::Rejected(reasons)) = outcomes.first() {
        print_section("Spec rejected");
        for reason in reasons {
            println!("  - {reason}");
        }
        std::process::exit(1);
    }

    let keys = store
        .keys()
        .await
        .map_err(|err| anyhow::anyhow!("store failed: {err}"))?;
    let key = keys.first().context("No record was created")?.clone();

    // Drain the launch tick, then feed synthesized snapshots until the
    // engine settles or the tick budget runs out.
    for tick in 0..=cmd.ticks {
        if tick > 0 {
            let record = load(&store, &key).await?;
            let exposures_per_arm = (cmd.users_per_tick / 2) * tick as u64;
            monitor_queue
                .publish(MonitorJob {
                    message_id: Uuid::new_v4(),
                    key: key.clone(),
                    variant_counts: simulated_counts(
                        &record.spec,
                        cmd.control_rate,
                        cmd.treatment_rate,
                        exposures_per_arm,
                    )?,
                })
                .await
                .map_err(|err| anyhow::anyhow!("enqueue failed: {err}"))?;
        }
        monitor
            .run_until_idle(monitor_queue.as_ref())
            .await
            .map_err(|err| anyhow::anyhow!("monitor failed: {err}"))?;
        if load(&store, &key).await?.status != ExperimentStatus::Running {
            break;
        }
    }

    let record = load(&store, &key).await?;
    let decisions = notifier.events.lock().await;
    if !print_structured(format, &record.decision_history)? {
        print_section(&format!("Simulation: {key}"));
        print_field("status", record.status);
        print_field("revision", record.revision);
        print_field("ticks evaluated", decisions.len());
        for event in decisions.iter() {
            println!(
                "  [{}] {} (confidence {}, n={})",
                event.timestamp.format("%H:%M:%S"),
                event.decision,
                event.confidence,
                event.sample_size
            );
        }
        if let Some(last) = record.last_decision() {
            print_field("final rationale", &last.rationale);
        }
    }
    Ok(())
}

async fn load(
    store: &Arc<InMemoryRecordStore>,
    key: &ExperimentKey,
) -> Result<growth_copilot_core::ExperimentRecord> {
    Ok(store
        .load(key)
        .await
        .map_err(|err| anyhow::anyhow!("store failed: {err}"))?
        .context("Record disappeared mid-simulation")?
        .value)
}
