//! Coordinator configuration.
//!
//! Sourced from `GROWTH_COPILOT_*` environment variables with sensible
//! defaults; a malformed value falls back to the default rather than
//! refusing to start, with a warning naming the variable.

use std::time::Duration;

use tracing::warn;

use crate::retry::RetryPolicy;

/// Tunables for the worker loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long a per-key lease is valid before another worker may
    /// reclaim it.
    pub lease_ttl: Duration,

    /// Maximum time a worker blocks waiting to acquire a contended
    /// lease before failing with a lock timeout.
    pub lock_max_wait: Duration,

    /// Bounded wait on queue receive, so loops can shut down cleanly.
    pub receive_timeout: Duration,

    /// Retry schedule for transient failures.
    pub retry: RetryPolicy,

    /// How many `(key, message_id)` pairs the dedup window remembers.
    pub dedup_window: usize,

    /// Interval at which the external scheduler is expected to enqueue
    /// monitor jobs for every running key. Informational here; the
    /// coordinator only reacts to jobs it receives.
    pub monitor_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            lock_max_wait: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            dedup_window: 1024,
            monitor_interval: Duration::from_secs(600),
        }
    }
}

impl CoordinatorConfig {
    /// Build from `GROWTH_COPILOT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lease_ttl: env_secs("GROWTH_COPILOT_LEASE_TTL_SECS", defaults.lease_ttl),
            lock_max_wait: env_secs("GROWTH_COPILOT_LOCK_WAIT_SECS", defaults.lock_max_wait),
            receive_timeout: env_secs(
                "GROWTH_COPILOT_RECEIVE_TIMEOUT_SECS",
                defaults.receive_timeout,
            ),
            retry: RetryPolicy {
                max_attempts: env_parse(
                    "GROWTH_COPILOT_RETRY_MAX_ATTEMPTS",
                    defaults.retry.max_attempts,
                ),
                ..defaults.retry
            },
            dedup_window: env_parse("GROWTH_COPILOT_DEDUP_WINDOW", defaults.dedup_window),
            monitor_interval: env_secs(
                "GROWTH_COPILOT_MONITOR_INTERVAL_SECS",
                defaults.monitor_interval,
            ),
        }
    }
}

fn env_secs(var: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(var, default.as_secs()))
}

fn env_parse<T: std::str::FromStr + Copy>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(%var, %raw, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.dedup_window, 1024);
        assert_eq!(config.monitor_interval, Duration::from_secs(600));
        assert!(config.lease_ttl > config.lock_max_wait);
    }
}
