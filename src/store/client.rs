//! Abstract object store contract.
//!
//! Every store implementation must implement [`ObjectStore`].  The trait
//! covers exactly the calls the convergence engine needs: existence,
//! creation with object locking, versioning get/enable, paged listing,
//! batch object removal, and bucket removal.  Nothing else -- this is
//! not a general S3 client.

use std::future::Future;
use std::pin::Pin;

/// Maximum keys per batch-removal request (the S3 DeleteObjects limit).
pub const MAX_REMOVE_BATCH: usize = 1000;

/// One page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Object keys in this page.
    pub keys: Vec<String>,
    /// Continuation token for the next page, `None` when exhausted.
    pub next_token: Option<String>,
}

/// A single object that the store refused to remove during a batch
/// deletion.
#[derive(Debug, Clone)]
pub struct ObjectRemovalError {
    /// Key of the object that was not removed.
    pub key: String,
    /// Store-provided failure description.
    pub message: String,
}

/// Async object store contract.
///
/// Implementations hold one shared client/connection pool and must be
/// safe for concurrent use across distinct bucket names.
pub trait ObjectStore: Send + Sync + 'static {
    /// Check whether a bucket named `bucket` exists.
    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Create `bucket`, optionally with object locking enabled.
    ///
    /// Object locking is a creation-time-only property at the store
    /// level; it cannot be retrofitted onto an existing bucket.
    fn create_bucket(
        &self,
        bucket: &str,
        object_locking: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Check whether versioning is currently enabled on `bucket`.
    fn versioning_enabled(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Enable versioning on `bucket`.  Enabling an already-enabled
    /// bucket is a no-op at the store level.
    fn enable_versioning(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// List one page of object keys in `bucket`, recursively over all
    /// prefixes, resuming from `continuation` when given.
    fn list_objects_page(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ObjectPage>> + Send + '_>>;

    /// Remove a batch of objects from `bucket`, returning per-object
    /// failures.  An `Ok` with a non-empty vector means the request
    /// itself succeeded but some objects were not removed.
    fn remove_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ObjectRemovalError>>> + Send + '_>>;

    /// Remove the (empty) bucket itself.
    fn remove_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
