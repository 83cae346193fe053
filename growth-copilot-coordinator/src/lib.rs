//! Growth Experiment Co-Pilot: worker coordinator.
//!
//! Queue-driven orchestration around the pure core: two consumer loops
//! (intake and monitor), a per-key lease so exactly one job per
//! experiment key is in flight at a time, `(key, message_id)`
//! deduplication against at-least-once delivery, bounded exponential
//! retry for transient failures, and a dead-letter destination for
//! everything that cannot be retried.
//!
//! The broker is a deployment choice: workers talk to [`queue::JobQueue`]
//! and [`store::RecordStore`] traits only. In-memory implementations back
//! the tests and the offline simulation; production adapters plug in
//! behind the same traits.

#![warn(missing_docs)]

pub mod config;
pub mod dedup;
pub mod error;
pub mod intake;
pub mod lock;
pub mod monitor;
pub mod queue;
pub mod retry;
pub mod store;

pub use config::CoordinatorConfig;
pub use dedup::DedupWindow;
pub use error::CoordinatorError;
pub use intake::IntakeWorker;
pub use lock::{Lease, LeaseManager};
pub use monitor::MonitorWorker;
pub use queue::{DeadLetter, InMemoryQueue, JobQueue};
pub use retry::RetryPolicy;
pub use store::{InMemoryRecordStore, RecordStore, Versioned};

/// What became of one handled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job was applied and the record saved.
    Processed,
    /// The `(key, message_id)` pair was already processed; no-op.
    Duplicate,
    /// A domain rejection (guardrail or policy); the record holds the
    /// reasons and awaits a revised submission.
    Rejected(Vec<String>),
    /// The job could not be applied and was moved to the dead-letter
    /// destination with the reason attached.
    DeadLettered(String),
}
