//! Cycle scheduling: retries with exponential backoff and periodic
//! resync.
//!
//! The engine and reconciler never retry internally; a failed cycle is
//! simply re-invoked from here, whole, after a backoff delay.  Distinct
//! bucket names reconcile concurrently -- the engine holds one shared
//! store client with no bucket-scoped locking.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::reconciler::{ReconcileEvent, Reconciler};

/// Backoff policy for failed cycles.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure; doubles per subsequent failure.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Total attempts per event within one convergence pass.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after `attempt` consecutive failures (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Cap the exponent so the shift cannot overflow.
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

/// Drives reconciliation cycles for a set of events.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    policy: RetryPolicy,
}

impl Scheduler {
    /// Create a scheduler over a shared reconciler.
    pub fn new(reconciler: Arc<Reconciler>, policy: RetryPolicy) -> Self {
        Self { reconciler, policy }
    }

    /// Run every event to success or attempt exhaustion, concurrently
    /// across bucket names.  Returns the number of events that never
    /// succeeded.
    pub async fn converge(&self, events: Vec<ReconcileEvent>) -> usize {
        let mut set = JoinSet::new();

        for event in events {
            let reconciler = Arc::clone(&self.reconciler);
            let policy = self.policy.clone();
            set.spawn(async move {
                for attempt in 1..=policy.max_attempts {
                    match reconciler.reconcile(&event).await {
                        Ok(()) => return true,
                        Err(err) => {
                            warn!(
                                "cycle for {} failed (attempt {}/{}): {:#}",
                                event.name(),
                                attempt,
                                policy.max_attempts,
                                anyhow::Error::new(err)
                            );
                            if attempt < policy.max_attempts {
                                tokio::time::sleep(policy.delay_for(attempt)).await;
                            }
                        }
                    }
                }
                error!(
                    "giving up on {} after {} attempts",
                    event.name(),
                    policy.max_attempts
                );
                false
            });
        }

        let mut failures = 0;
        while let Some(outcome) = set.join_next().await {
            if !matches!(outcome, Ok(true)) {
                failures += 1;
            }
        }
        failures
    }

    /// Converge once, then keep re-converging every `resync_interval`.
    /// A zero interval means a single pass.
    pub async fn run(&self, events: Vec<ReconcileEvent>, resync_interval: Duration) {
        loop {
            let failures = self.converge(events.clone()).await;
            if failures > 0 {
                warn!("convergence pass finished with {} unresolved events", failures);
            } else {
                info!("convergence pass finished, all events reconciled");
            }

            if resync_interval.is_zero() {
                return;
            }
            tokio::time::sleep(resync_interval).await;
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BucketEngine, DesiredBucket};
    use crate::status::{MemoryStatusSink, StatusSink};
    use crate::store::client::ObjectStore;
    use crate::store::memory::MemoryStore;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    fn scheduler_over(store: &Arc<MemoryStore>, policy: RetryPolicy) -> Scheduler {
        let engine = Arc::new(BucketEngine::new(
            Arc::clone(store) as Arc<dyn ObjectStore>
        ));
        let sink = Arc::new(MemoryStatusSink::new()) as Arc<dyn StatusSink>;
        Scheduler::new(Arc::new(Reconciler::new(engine, sink)), policy)
    }

    fn apply(name: &str) -> ReconcileEvent {
        ReconcileEvent::Apply(DesiredBucket {
            name: name.to_string(),
            object_locking: false,
            versioning: false,
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_transient_failures_converge_within_budget() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(&store, fast_policy(5));
        store.fail_next_exists(2);

        let failures = scheduler.converge(vec![apply("logs")]).await;

        assert_eq!(failures, 0);
        // Two failed attempts plus the succeeding one.
        assert_eq!(
            store
                .operations()
                .iter()
                .filter(|op| op.starts_with("head_bucket"))
                .count(),
            3
        );
        assert!(store.bucket_exists("logs").await.unwrap());
    }

    #[tokio::test]
    async fn test_attempt_exhaustion_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(&store, fast_policy(2));
        store.fail_next_exists(10);

        let failures = scheduler.converge(vec![apply("logs")]).await;

        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_multiple_names_converge_in_one_pass() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(&store, fast_policy(3));

        let failures = scheduler
            .converge(vec![apply("logs"), apply("backups"), apply("media")])
            .await;

        assert_eq!(failures, 0);
        for name in ["logs", "backups", "media"] {
            assert!(store.bucket_exists(name).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_run_with_zero_interval_is_single_pass() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_over(&store, fast_policy(3));

        scheduler
            .run(vec![apply("logs")], Duration::ZERO)
            .await;

        assert!(store.bucket_exists("logs").await.unwrap());
    }
}
