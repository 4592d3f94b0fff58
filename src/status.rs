//! Observed bucket status and the sink it is persisted to.
//!
//! The reconciler writes exactly one status per create-path cycle.  The
//! sink is an external collaborator in the original design (a resource
//! status subresource); here it is a trait so the binary can use the
//! in-memory sink and other deployments can plug in their own.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Observed state of a managed bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    /// No successful cycle has created the bucket yet.
    NotCreated,
    /// The last cycle converged successfully.
    Created,
    /// The last cycle failed; the store may not match the desired state.
    Error,
}

impl fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BucketStatus::NotCreated => "NotCreated",
            BucketStatus::Created => "Created",
            BucketStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Async status persistence contract.
///
/// Writes are idempotent -- overwriting the same status repeatedly is
/// harmless.
pub trait StatusSink: Send + Sync + 'static {
    /// Persist `status` for the resource `name`.
    fn record(
        &self,
        name: &str,
        status: BucketStatus,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// In-memory status sink.
///
/// Backs the standalone binary and the test suite.  Statuses are held in
/// a `tokio::sync::RwLock<HashMap>` keyed by resource name.
#[derive(Default)]
pub struct MemoryStatusSink {
    statuses: tokio::sync::RwLock<HashMap<String, BucketStatus>>,
    /// When set, every `record` call fails.  Test hook for the
    /// status-persistence-failure path.
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStatusSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the last recorded status for `name`, if any.
    pub async fn get(&self, name: &str) -> Option<BucketStatus> {
        self.statuses.read().await.get(name).copied()
    }

    /// Make all subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl StatusSink for MemoryStatusSink {
    fn record(
        &self,
        name: &str,
        status: BucketStatus,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("status sink unavailable");
            }
            self.statuses.write().await.insert(name, status);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_get() {
        let sink = MemoryStatusSink::new();
        sink.record("logs", BucketStatus::Created).await.unwrap();
        assert_eq!(sink.get("logs").await, Some(BucketStatus::Created));
        assert_eq!(sink.get("other").await, None);
    }

    #[tokio::test]
    async fn test_record_overwrites() {
        let sink = MemoryStatusSink::new();
        sink.record("logs", BucketStatus::Error).await.unwrap();
        sink.record("logs", BucketStatus::Created).await.unwrap();
        assert_eq!(sink.get("logs").await, Some(BucketStatus::Created));
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let sink = MemoryStatusSink::new();
        sink.set_fail_writes(true);
        assert!(sink.record("logs", BucketStatus::Created).await.is_err());
        assert_eq!(sink.get("logs").await, None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(BucketStatus::NotCreated.to_string(), "NotCreated");
        assert_eq!(BucketStatus::Created.to_string(), "Created");
        assert_eq!(BucketStatus::Error.to_string(), "Error");
    }
}
