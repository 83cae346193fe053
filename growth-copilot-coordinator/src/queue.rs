//! Broker-agnostic job queues.
//!
//! Workers see only [`JobQueue`]; the in-memory implementation backs the
//! tests and the offline simulation, and a broker adapter implements the
//! same trait in production.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::error::CoordinatorError;

/// A job moved aside after a terminal failure.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter<T> {
    /// The failed job, unmodified.
    pub job: T,
    /// Why it could not be applied.
    pub reason: String,
    /// When it was dead-lettered.
    pub at: DateTime<Utc>,
}

/// One logical queue of jobs of type `T`.
#[async_trait]
pub trait JobQueue<T: Send + 'static>: Send + Sync {
    /// Enqueue a job.
    async fn publish(&self, job: T) -> Result<(), CoordinatorError>;

    /// Receive the next job, waiting up to `timeout`. `Ok(None)` means
    /// the queue stayed empty for the whole wait.
    async fn receive(&self, timeout: Duration) -> Result<Option<T>, CoordinatorError>;

    /// Move a job to the dead-letter destination with the failure
    /// reason attached.
    async fn dead_letter(&self, job: T, reason: String) -> Result<(), CoordinatorError>;
}

/// FIFO in-process queue with an attached dead-letter store.
#[derive(Debug)]
pub struct InMemoryQueue<T> {
    jobs: Mutex<VecDeque<T>>,
    dead: Mutex<Vec<DeadLetter<T>>>,
    notify: Notify,
}

impl<T> Default for InMemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryQueue<T> {
    /// Empty queue.
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            dead: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Number of jobs currently waiting.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Whether no jobs are waiting.
    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Snapshot of the dead-letter store.
    pub async fn dead_letters(&self) -> Vec<DeadLetter<T>>
    where
        T: Clone,
    {
        self.dead.lock().await.clone()
    }
}

#[async_trait]
impl<T: Send + 'static> JobQueue<T> for InMemoryQueue<T> {
    async fn publish(&self, job: T) -> Result<(), CoordinatorError> {
        self.jobs.lock().await.push_back(job);
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<T>, CoordinatorError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Ok(Some(job));
            }
            let wait = self.notify.notified();
            // Re-check after registering, a publish may have raced in.
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, wait).await.is_err() {
                return Ok(self.jobs.lock().await.pop_front());
            }
        }
    }

    async fn dead_letter(&self, job: T, reason: String) -> Result<(), CoordinatorError> {
        self.dead.lock().await.push(DeadLetter {
            job,
            reason,
            at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = InMemoryQueue::new();
        queue.publish(1u32).await.unwrap();
        queue.publish(2).await.unwrap();
        let short = Duration::from_millis(50);
        assert_eq!(queue.receive(short).await.unwrap(), Some(1));
        assert_eq!(queue.receive(short).await.unwrap(), Some(2));
        assert_eq!(queue.receive(short).await.unwrap(), None);
    }

    #[tokio::test]
    async fn receive_wakes_on_publish() {
        let queue = std::sync::Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish(7u32).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap(), Some(7));
    }

    #[tokio::test]
    async fn dead_letters_keep_the_reason() {
        let queue = InMemoryQueue::new();
        queue
            .dead_letter(9u32, "illegal transition".to_string())
            .await
            .unwrap();
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job, 9);
        assert_eq!(dead[0].reason, "illegal transition");
    }
}
