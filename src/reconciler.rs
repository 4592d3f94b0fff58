//! Reconciler: bridges one triggered cycle to the engine and persists
//! the outcome.
//!
//! Exactly one terminal outcome per cycle: success with status
//! `Created`, failure with status `Error` persisted, or failure with no
//! status write (delete path, or the status write itself failed).

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{error, info};

use crate::engine::{BucketEngine, DesiredBucket};
use crate::errors::ReconcileError;
use crate::metrics::{RECONCILE_CYCLES_TOTAL, RECONCILE_DURATION_SECONDS};
use crate::status::{BucketStatus, StatusSink};

/// One triggered reconciliation input.
///
/// `Delete` carries only the name: the owning record is already gone,
/// so its spec fields are unknown and irrelevant for teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// The resource exists with this desired spec.
    Apply(DesiredBucket),
    /// The resource was deleted; only its name is still known.
    Delete { name: String },
}

impl ReconcileEvent {
    /// The bucket name this event concerns.
    pub fn name(&self) -> &str {
        match self {
            ReconcileEvent::Apply(desired) => &desired.name,
            ReconcileEvent::Delete { name } => name,
        }
    }
}

/// Runs reconciliation cycles against a shared engine and status sink.
///
/// Both collaborators are constructor-injected; the reconciler holds no
/// other state and is safe to share across tasks.
pub struct Reconciler {
    engine: Arc<BucketEngine>,
    status: Arc<dyn StatusSink>,
}

impl Reconciler {
    /// Create a reconciler over an engine and a status sink.
    pub fn new(engine: Arc<BucketEngine>, status: Arc<dyn StatusSink>) -> Self {
        Self { engine, status }
    }

    /// Run one reconciliation cycle.
    ///
    /// A returned error is the signal to reschedule the cycle; `Ok`
    /// suppresses rescheduling.
    pub async fn reconcile(&self, event: &ReconcileEvent) -> Result<(), ReconcileError> {
        let start = Instant::now();
        let action = match event {
            ReconcileEvent::Apply(_) => "apply",
            ReconcileEvent::Delete { .. } => "delete",
        };

        let result = self.run_cycle(event).await;

        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!(RECONCILE_CYCLES_TOTAL, "action" => action, "outcome" => outcome).increment(1);
        histogram!(RECONCILE_DURATION_SECONDS, "action" => action)
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn run_cycle(&self, event: &ReconcileEvent) -> Result<(), ReconcileError> {
        match event {
            ReconcileEvent::Delete { name } => {
                info!("reconciling deletion of bucket {}", name);
                // No status write on this path: the owning record no
                // longer exists.
                self.engine.ensure_deleted(name).await?;
                Ok(())
            }
            ReconcileEvent::Apply(desired) => {
                info!("reconciling bucket {}", desired.name);
                match self.engine.ensure_created(desired).await {
                    Ok(()) => {
                        self.persist(&desired.name, BucketStatus::Created).await?;
                        Ok(())
                    }
                    Err(engine_err) => {
                        error!("unable to converge bucket {}: {}", desired.name, engine_err);
                        self.persist(&desired.name, BucketStatus::Error).await?;
                        Err(engine_err.into())
                    }
                }
            }
        }
    }

    async fn persist(&self, name: &str, status: BucketStatus) -> Result<(), ReconcileError> {
        self.status
            .record(name, status)
            .await
            .map_err(|e| ReconcileError::StatusPersist {
                name: name.to_string(),
                source: e,
            })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::status::MemoryStatusSink;
    use crate::store::client::ObjectStore;
    use crate::store::memory::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        sink: Arc<MemoryStatusSink>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemoryStatusSink::new());
        let engine = Arc::new(BucketEngine::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>
        ));
        let reconciler = Reconciler::new(engine, Arc::clone(&sink) as Arc<dyn StatusSink>);
        Fixture {
            store,
            sink,
            reconciler,
        }
    }

    fn apply(name: &str, versioning: bool) -> ReconcileEvent {
        ReconcileEvent::Apply(DesiredBucket {
            name: name.to_string(),
            object_locking: false,
            versioning,
        })
    }

    #[tokio::test]
    async fn test_apply_success_persists_created() {
        let f = fixture();

        f.reconciler.reconcile(&apply("logs", true)).await.unwrap();

        assert_eq!(f.store.bucket_settings("logs").await, Some((false, true)));
        assert_eq!(f.sink.get("logs").await, Some(BucketStatus::Created));
    }

    #[tokio::test]
    async fn test_apply_failure_persists_error_and_propagates() {
        let f = fixture();
        f.store.fail_next_exists(1);

        let err = f
            .reconciler
            .reconcile(&apply("logs", false))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Engine(EngineError::StoreQuery { .. })
        ));
        assert_eq!(f.sink.get("logs").await, Some(BucketStatus::Error));
    }

    #[tokio::test]
    async fn test_delete_path_writes_no_status() {
        let f = fixture();
        f.store.create_bucket("logs", false).await.unwrap();
        f.store.insert_object("logs", "k").await;

        f.reconciler
            .reconcile(&ReconcileEvent::Delete {
                name: "logs".to_string(),
            })
            .await
            .unwrap();

        assert!(!f.store.bucket_exists("logs").await.unwrap());
        assert_eq!(f.sink.get("logs").await, None);
    }

    #[tokio::test]
    async fn test_delete_failure_propagates_without_status() {
        let f = fixture();
        f.store.create_bucket("logs", false).await.unwrap();
        f.store.insert_object("logs", "k").await;
        f.store.fail_removal_of("logs", "k");

        let err = f
            .reconciler
            .reconcile(&ReconcileEvent::Delete {
                name: "logs".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Engine(EngineError::PartialPurge { .. })
        ));
        assert_eq!(f.sink.get("logs").await, None);
    }

    #[tokio::test]
    async fn test_status_write_failure_is_fatal_to_cycle() {
        let f = fixture();
        f.sink.set_fail_writes(true);

        let err = f
            .reconciler
            .reconcile(&apply("logs", false))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::StatusPersist { .. }));
        // The bucket itself still converged; only the status write failed.
        assert!(f.store.bucket_exists("logs").await.unwrap());
    }

    #[test]
    fn test_event_name() {
        assert_eq!(apply("logs", false).name(), "logs");
        assert_eq!(
            ReconcileEvent::Delete {
                name: "logs".to_string()
            }
            .name(),
            "logs"
        );
    }
}
