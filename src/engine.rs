//! Storage convergence engine.
//!
//! Translates one desired bucket state (or its absence) into the
//! minimal set of store operations making actual state match desired
//! state, and reports success or a classified failure.
//!
//! The engine performs no retries: every failure short-circuits the
//! cycle and is returned to the caller, which owns rescheduling.
//! Cancellation propagates naturally -- dropping a cycle future aborts
//! the in-flight store call.

use std::mem;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::metrics::OBJECTS_PURGED_TOTAL;
use crate::store::client::{ObjectRemovalError, ObjectStore, MAX_REMOVE_BATCH};

/// Capacity of the listing-to-deletion handoff channel.  Bounds how far
/// enumeration can run ahead of deletion, so an unbounded bucket is
/// never materialized in memory.
const PURGE_CHANNEL_CAPACITY: usize = 1000;

/// Desired state of one bucket.  Immutable input to a reconciliation
/// cycle; supplied fresh on each invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredBucket {
    /// Bucket name (validated at configuration load).
    pub name: String,
    /// Create the bucket with object locking.  Creation-time-only.
    pub object_locking: bool,
    /// Keep versioning enabled on the bucket.
    pub versioning: bool,
}

/// Convergence engine over one shared object store client.
///
/// A single long-lived instance is shared across reconciliation cycles:
/// one store connection, many buckets.  Safe for concurrent use across
/// distinct bucket names.
pub struct BucketEngine {
    store: Arc<dyn ObjectStore>,
}

impl BucketEngine {
    /// Create an engine over an already-validated store client.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Converge the store towards `desired`: the bucket exists, with
    /// versioning enabled when requested.
    ///
    /// Once a desired state has been applied, repeat calls issue only
    /// reads (existence and versioning checks) and no mutations.
    ///
    /// Known limitation: object locking is a creation-time-only store
    /// property.  A pre-existing bucket with a different locking
    /// setting is neither detected nor corrected here.
    pub async fn ensure_created(&self, desired: &DesiredBucket) -> Result<(), EngineError> {
        let name = desired.name.as_str();

        let exists = self
            .store
            .bucket_exists(name)
            .await
            .map_err(|e| EngineError::StoreQuery {
                bucket: name.to_string(),
                operation: "bucket_exists",
                source: e,
            })?;

        if exists {
            debug!("bucket {} already exists", name);
        } else {
            self.store
                .create_bucket(name, desired.object_locking)
                .await
                .map_err(|e| EngineError::StoreMutation {
                    bucket: name.to_string(),
                    operation: "create_bucket",
                    source: e,
                })?;
            info!(
                "created bucket {} (object_locking={})",
                name, desired.object_locking
            );
        }

        // Versioning can be enabled post-creation, so convergence runs
        // on every cycle.  Both the read and the write count as part of
        // the mutation step.
        if desired.versioning {
            let enabled = self.store.versioning_enabled(name).await.map_err(|e| {
                EngineError::StoreMutation {
                    bucket: name.to_string(),
                    operation: "get_versioning",
                    source: e,
                }
            })?;

            if !enabled {
                self.store.enable_versioning(name).await.map_err(|e| {
                    EngineError::StoreMutation {
                        bucket: name.to_string(),
                        operation: "enable_versioning",
                        source: e,
                    }
                })?;
                info!("enabled versioning on bucket {}", name);
            }
        }

        Ok(())
    }

    /// Converge towards absence: the bucket and all its objects are
    /// gone.  Deleting a bucket that does not exist succeeds trivially.
    ///
    /// The store refuses to delete a non-empty bucket, so all objects
    /// are purged first.  If any object removal fails, bucket removal
    /// is withheld and the first per-object failure is returned; a
    /// later cycle retries the now-smaller object set.
    pub async fn ensure_deleted(&self, name: &str) -> Result<(), EngineError> {
        let exists = self
            .store
            .bucket_exists(name)
            .await
            .map_err(|e| EngineError::StoreQuery {
                bucket: name.to_string(),
                operation: "bucket_exists",
                source: e,
            })?;

        if !exists {
            debug!("bucket {} already absent", name);
            return Ok(());
        }

        self.purge_objects(name).await?;

        self.store
            .remove_bucket(name)
            .await
            .map_err(|e| EngineError::StoreMutation {
                bucket: name.to_string(),
                operation: "remove_bucket",
                source: e,
            })?;

        info!("removed bucket {}", name);
        Ok(())
    }

    /// Remove every object in `bucket`.
    ///
    /// Enumeration and batch deletion run as two concurrent stages
    /// joined by a bounded channel: a lister task pages object keys
    /// into the channel while this task drains it into batch-removal
    /// requests, so deletion starts before listing completes.
    ///
    /// A listing failure stops enumeration; keys already queued are
    /// still deleted, then the cycle fails with a query error so the
    /// caller retries.  A per-object removal failure takes precedence
    /// as the returned error.
    async fn purge_objects(&self, bucket: &str) -> Result<(), EngineError> {
        let (tx, mut rx) = mpsc::channel::<String>(PURGE_CHANNEL_CAPACITY);

        let store = Arc::clone(&self.store);
        let bucket_name = bucket.to_string();
        let lister = tokio::spawn(async move {
            let mut continuation: Option<String> = None;
            loop {
                let page = store
                    .list_objects_page(&bucket_name, continuation.take())
                    .await?;
                continuation = page.next_token;
                for key in page.keys {
                    // A closed channel means the consumer bailed out;
                    // nothing left to enumerate for.
                    if tx.send(key).await.is_err() {
                        return Ok(());
                    }
                }
                if continuation.is_none() {
                    return Ok::<(), anyhow::Error>(());
                }
            }
        });

        let mut first_failure: Option<ObjectRemovalError> = None;
        let mut removed: u64 = 0;
        let mut batch: Vec<String> = Vec::with_capacity(MAX_REMOVE_BATCH);

        // Drain until the lister closes its end of the channel.
        while let Some(key) = rx.recv().await {
            batch.push(key);
            if batch.len() >= MAX_REMOVE_BATCH {
                self.submit_batch(bucket, mem::take(&mut batch), &mut first_failure, &mut removed)
                    .await?;
            }
        }
        if !batch.is_empty() {
            self.submit_batch(bucket, batch, &mut first_failure, &mut removed)
                .await?;
        }

        let listing = lister.await;

        counter!(OBJECTS_PURGED_TOTAL).increment(removed);

        if let Some(failure) = first_failure {
            return Err(EngineError::PartialPurge {
                bucket: bucket.to_string(),
                key: failure.key,
                message: failure.message,
            });
        }

        match listing {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EngineError::StoreQuery {
                bucket: bucket.to_string(),
                operation: "list_objects",
                source: e,
            }),
            Err(join_err) => Err(EngineError::StoreQuery {
                bucket: bucket.to_string(),
                operation: "list_objects",
                source: anyhow::Error::new(join_err),
            }),
        }
    }

    /// Submit one batch-removal request, logging every per-object
    /// failure and retaining the first as the representative one.
    async fn submit_batch(
        &self,
        bucket: &str,
        batch: Vec<String>,
        first_failure: &mut Option<ObjectRemovalError>,
        removed: &mut u64,
    ) -> Result<(), EngineError> {
        let submitted = batch.len() as u64;
        let failures = self
            .store
            .remove_objects(bucket, batch)
            .await
            .map_err(|e| EngineError::StoreMutation {
                bucket: bucket.to_string(),
                operation: "remove_objects",
                source: e,
            })?;

        *removed += submitted - failures.len() as u64;

        for failure in failures {
            warn!(
                "failed to remove object {}/{}: {}",
                bucket, failure.key, failure.message
            );
            if first_failure.is_none() {
                *first_failure = Some(failure);
            }
        }
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
