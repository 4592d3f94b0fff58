//! Error taxonomy for the convergence engine and reconciler.
//!
//! Every variant maps to a distinct failure class with its own retry
//! semantics.  The engine never swallows a store error; each failure is
//! classified here and returned to the caller, which decides whether to
//! reschedule the cycle.

use thiserror::Error;

/// Failure classes produced by the storage convergence engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection details failed validation.  Fatal at construction --
    /// the process must not start with these settings.
    #[error("invalid connection details: {reason}")]
    InvalidConfiguration { reason: String },

    /// A read against the store failed (existence or listing).
    /// Transient by assumption; worth retrying a full cycle.
    #[error("store query `{operation}` failed for bucket `{bucket}`")]
    StoreQuery {
        bucket: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A write against the store failed (create, versioning change,
    /// bucket removal).  May be transient or permanent; the engine does
    /// not distinguish -- backoff policy is the scheduler's concern.
    #[error("store mutation `{operation}` failed for bucket `{bucket}`")]
    StoreMutation {
        bucket: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// One or more object deletions failed during a bucket purge.
    /// Bucket removal was withheld.  Retry-worthy: the next cycle
    /// retries the now-smaller object set.  Carries the first
    /// per-object failure as the representative error.
    #[error("failed to remove object `{key}` from bucket `{bucket}`: {message}")]
    PartialPurge {
        bucket: String,
        key: String,
        message: String,
    },
}

/// Failures terminating one reconciliation cycle.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The convergence engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The cycle outcome could not be persisted to the status sink.
    /// Fatal to the cycle even when convergence itself succeeded.
    #[error("failed to persist status for `{name}`")]
    StatusPersist {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_query_display_names_operation_and_bucket() {
        let err = EngineError::StoreQuery {
            bucket: "logs".to_string(),
            operation: "bucket_exists",
            source: anyhow::anyhow!("connection refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("bucket_exists"));
        assert!(msg.contains("logs"));
    }

    #[test]
    fn test_partial_purge_display_carries_key_and_message() {
        let err = EngineError::PartialPurge {
            bucket: "logs".to_string(),
            key: "a/b.txt".to_string(),
            message: "AccessDenied".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a/b.txt"));
        assert!(msg.contains("AccessDenied"));
    }

    #[test]
    fn test_reconcile_error_from_engine_error() {
        let err: ReconcileError = EngineError::InvalidConfiguration {
            reason: "empty endpoint".to_string(),
        }
        .into();
        assert!(matches!(err, ReconcileError::Engine(_)));
    }
}
