//! In-memory object store.
//!
//! Buckets and object keys are held in `tokio::sync::RwLock<HashMap<...>>`
//! maps.  Serves two purposes: the `memory` dry-run backend of the
//! binary (exercise a configuration without touching a real store) and
//! the test double for the convergence engine.
//!
//! Every store call is appended to an operation log so tests can assert
//! exactly which calls a cycle issued.  Failure injection covers the
//! paths the engine must classify: existence checks, listing pages, and
//! removal of individual keys.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::client::{ObjectPage, ObjectRemovalError, ObjectStore};

/// Default number of keys returned per listing page.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// State held for one bucket.
#[derive(Debug, Clone, Default)]
struct BucketRecord {
    object_locking: bool,
    versioning: bool,
    objects: BTreeSet<String>,
}

/// In-memory store with an operation log and failure injection.
pub struct MemoryStore {
    buckets: tokio::sync::RwLock<HashMap<String, BucketRecord>>,
    /// Chronological log of store calls, e.g. `head_bucket logs`.
    ops: Mutex<Vec<String>>,
    /// Keys (as `bucket/key`) whose removal must fail.
    failing_removals: Mutex<HashSet<String>>,
    /// Number of upcoming existence checks that must fail.
    failing_exists: AtomicUsize,
    /// Number of upcoming listing pages that must fail.
    failing_lists: AtomicUsize,
    /// Number of upcoming versioning reads that must fail.
    failing_versioning: AtomicUsize,
    /// Listing page size; small values exercise pagination.
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store with a custom listing page size.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: tokio::sync::RwLock::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
            failing_removals: Mutex::new(HashSet::new()),
            failing_exists: AtomicUsize::new(0),
            failing_lists: AtomicUsize::new(0),
            failing_versioning: AtomicUsize::new(0),
            page_size: page_size.max(1),
        }
    }

    /// Seed an object into `bucket`, creating the bucket if needed.
    pub async fn insert_object(&self, bucket: &str, key: &str) {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .objects
            .insert(key.to_string());
    }

    /// Return `(object_locking, versioning)` for `bucket`, if present.
    pub async fn bucket_settings(&self, bucket: &str) -> Option<(bool, bool)> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|b| (b.object_locking, b.versioning))
    }

    /// Remaining object keys in `bucket` (empty when the bucket is gone).
    pub async fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|b| b.objects.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make removal of `key` in `bucket` fail with a per-object error.
    pub fn fail_removal_of(&self, bucket: &str, key: &str) {
        self.failing_removals
            .lock()
            .expect("removal set poisoned")
            .insert(format!("{bucket}/{key}"));
    }

    /// Clear all injected per-key removal failures.
    pub fn clear_removal_failures(&self) {
        self.failing_removals
            .lock()
            .expect("removal set poisoned")
            .clear();
    }

    /// Make the next `n` existence checks fail.
    pub fn fail_next_exists(&self, n: usize) {
        self.failing_exists.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` listing pages fail.
    pub fn fail_next_lists(&self, n: usize) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` versioning reads fail.
    pub fn fail_next_versioning(&self, n: usize) {
        self.failing_versioning.store(n, Ordering::SeqCst);
    }

    /// Snapshot of the operation log.
    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().expect("op log poisoned").clone()
    }

    /// Operations from the log that mutate store state.
    pub fn mutations(&self) -> Vec<String> {
        const MUTATING: [&str; 4] = [
            "create_bucket",
            "put_bucket_versioning",
            "delete_objects",
            "delete_bucket",
        ];
        self.operations()
            .into_iter()
            .filter(|op| MUTATING.iter().any(|m| op.starts_with(m)))
            .collect()
    }

    /// Drop everything recorded so far without touching bucket state.
    pub fn clear_operations(&self) {
        self.ops.lock().expect("op log poisoned").clear();
    }

    fn log(&self, op: String) {
        self.ops.lock().expect("op log poisoned").push(op);
    }

    /// Decrement `counter` if positive, reporting whether this call
    /// should fail.
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ObjectStore for MemoryStore {
    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.log(format!("head_bucket {bucket}"));
            if Self::take_failure(&self.failing_exists) {
                anyhow::bail!("injected head_bucket failure for {bucket}");
            }
            Ok(self.buckets.read().await.contains_key(&bucket))
        })
    }

    fn create_bucket(
        &self,
        bucket: &str,
        object_locking: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.log(format!("create_bucket {bucket} locking={object_locking}"));
            let mut buckets = self.buckets.write().await;
            if buckets.contains_key(&bucket) {
                anyhow::bail!("BucketAlreadyOwnedByYou: {bucket}");
            }
            buckets.insert(
                bucket,
                BucketRecord {
                    object_locking,
                    ..BucketRecord::default()
                },
            );
            Ok(())
        })
    }

    fn versioning_enabled(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.log(format!("get_bucket_versioning {bucket}"));
            if Self::take_failure(&self.failing_versioning) {
                anyhow::bail!("injected get_bucket_versioning failure for {bucket}");
            }
            let buckets = self.buckets.read().await;
            let record = buckets
                .get(&bucket)
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {bucket}"))?;
            Ok(record.versioning)
        })
    }

    fn enable_versioning(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.log(format!("put_bucket_versioning {bucket}"));
            let mut buckets = self.buckets.write().await;
            let record = buckets
                .get_mut(&bucket)
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {bucket}"))?;
            record.versioning = true;
            Ok(())
        })
    }

    fn list_objects_page(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ObjectPage>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.log(format!("list_objects {bucket}"));
            if Self::take_failure(&self.failing_lists) {
                anyhow::bail!("injected list failure for {bucket}");
            }
            let buckets = self.buckets.read().await;
            let record = buckets
                .get(&bucket)
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {bucket}"))?;

            // Continuation token is the last key of the previous page;
            // BTreeSet ordering makes resumption deterministic.
            let keys: Vec<String> = match &continuation {
                Some(after) => record
                    .objects
                    .range::<String, _>((
                        std::ops::Bound::Excluded(after.clone()),
                        std::ops::Bound::Unbounded,
                    ))
                    .take(self.page_size)
                    .cloned()
                    .collect(),
                None => record.objects.iter().take(self.page_size).cloned().collect(),
            };

            let next_token = if keys.len() == self.page_size
                && keys.last().map(|last| {
                    record
                        .objects
                        .range::<String, _>((
                            std::ops::Bound::Excluded(last.clone()),
                            std::ops::Bound::Unbounded,
                        ))
                        .next()
                        .is_some()
                }) == Some(true)
            {
                keys.last().cloned()
            } else {
                None
            };

            Ok(ObjectPage { keys, next_token })
        })
    }

    fn remove_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ObjectRemovalError>>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.log(format!("delete_objects {bucket} ({} keys)", keys.len()));
            let failing = self
                .failing_removals
                .lock()
                .expect("removal set poisoned")
                .clone();
            let mut buckets = self.buckets.write().await;
            let record = buckets
                .get_mut(&bucket)
                .ok_or_else(|| anyhow::anyhow!("NoSuchBucket: {bucket}"))?;

            let mut failures = Vec::new();
            for key in keys {
                if failing.contains(&format!("{bucket}/{key}")) {
                    failures.push(ObjectRemovalError {
                        key,
                        message: "AccessDenied: injected removal failure".to_string(),
                    });
                } else {
                    record.objects.remove(&key);
                }
            }
            Ok(failures)
        })
    }

    fn remove_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.log(format!("delete_bucket {bucket}"));
            let mut buckets = self.buckets.write().await;
            match buckets.get(&bucket) {
                None => anyhow::bail!("NoSuchBucket: {bucket}"),
                Some(record) if !record.objects.is_empty() => {
                    anyhow::bail!("BucketNotEmpty: {bucket}")
                }
                Some(_) => {
                    buckets.remove(&bucket);
                    Ok(())
                }
            }
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_exists() {
        let store = MemoryStore::new();
        assert!(!store.bucket_exists("logs").await.unwrap());
        store.create_bucket("logs", false).await.unwrap();
        assert!(store.bucket_exists("logs").await.unwrap());
        assert_eq!(store.bucket_settings("logs").await, Some((false, false)));
    }

    #[tokio::test]
    async fn test_versioning_roundtrip() {
        let store = MemoryStore::new();
        store.create_bucket("logs", false).await.unwrap();
        assert!(!store.versioning_enabled("logs").await.unwrap());
        store.enable_versioning("logs").await.unwrap();
        assert!(store.versioning_enabled("logs").await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_paginates_in_order() {
        let store = MemoryStore::with_page_size(2);
        store.create_bucket("logs", false).await.unwrap();
        for key in ["a", "b", "c", "d", "e"] {
            store.insert_object("logs", key).await;
        }

        let mut collected = Vec::new();
        let mut token = None;
        loop {
            let page = store.list_objects_page("logs", token).await.unwrap();
            collected.extend(page.keys);
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(collected, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_remove_bucket_refuses_non_empty() {
        let store = MemoryStore::new();
        store.create_bucket("logs", false).await.unwrap();
        store.insert_object("logs", "k").await;
        assert!(store.remove_bucket("logs").await.is_err());
        store.remove_objects("logs", vec!["k".to_string()]).await.unwrap();
        store.remove_bucket("logs").await.unwrap();
        assert!(!store.bucket_exists("logs").await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_removal_failure_keeps_object() {
        let store = MemoryStore::new();
        store.create_bucket("logs", false).await.unwrap();
        store.insert_object("logs", "k1").await;
        store.insert_object("logs", "k2").await;
        store.fail_removal_of("logs", "k1");

        let failures = store
            .remove_objects("logs", vec!["k1".to_string(), "k2".to_string()])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "k1");
        assert_eq!(store.object_keys("logs").await, vec!["k1"]);
    }

    #[tokio::test]
    async fn test_injected_exists_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_exists(2);
        assert!(store.bucket_exists("logs").await.is_err());
        assert!(store.bucket_exists("logs").await.is_err());
        assert!(store.bucket_exists("logs").await.is_ok());
    }

    #[tokio::test]
    async fn test_operation_log_classifies_mutations() {
        let store = MemoryStore::new();
        store.create_bucket("logs", false).await.unwrap();
        store.bucket_exists("logs").await.unwrap();
        store.enable_versioning("logs").await.unwrap();
        assert_eq!(store.operations().len(), 3);
        assert_eq!(store.mutations().len(), 2);
    }
}
