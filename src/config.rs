//! Configuration loading and types for bucketkeeper.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the store connection, the desired buckets, reconcile/retry
//! behavior, logging, and observability.
//!
//! Bucket names are validated at load time (store-compliant charset and
//! length) so a bad spec fails the process before any store call.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::engine::DesiredBucket;
use crate::scheduler::RetryPolicy;
use crate::store::aws::ConnectionDetails;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    /// Object store connection settings.
    #[serde(default)]
    #[garde(skip)]
    pub store: StoreConfig,

    /// Desired buckets to keep converged.
    #[serde(default)]
    #[garde(dive)]
    pub buckets: Vec<BucketSpec>,

    /// Reconciliation / retry settings.
    #[serde(default)]
    #[garde(skip)]
    pub reconcile: ReconcileConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(skip)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics exporter).
    #[serde(default)]
    #[garde(skip)]
    pub observability: ObservabilityConfig,
}

/// Object store selection.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend type: `s3` or `memory` (dry-run).
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// S3-compatible endpoint configuration.
    #[serde(default)]
    pub s3: Option<S3StoreConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            s3: None,
        }
    }
}

/// S3-compatible endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct S3StoreConfig {
    /// Host and port of the endpoint, without a scheme.
    pub endpoint: String,

    /// Whether to speak TLS to the endpoint.
    #[serde(default)]
    pub use_tls: bool,

    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default)]
    pub access_key: String,

    /// Secret key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default)]
    pub secret_key: String,

    /// Region used for signing and bucket creation.
    #[serde(default = "default_region")]
    pub region: String,

    /// Optional path to a PEM bundle for a custom CA.
    #[serde(default)]
    pub ca_bundle: String,
}

impl S3StoreConfig {
    /// Build validated-ready connection details, reading the CA bundle
    /// file when one is configured.
    pub fn connection_details(&self) -> anyhow::Result<ConnectionDetails> {
        let ca_bundle = if self.ca_bundle.is_empty() {
            None
        } else {
            Some(std::fs::read(&self.ca_bundle).map_err(|e| {
                anyhow::anyhow!("reading CA bundle {}: {e}", self.ca_bundle)
            })?)
        };

        Ok(ConnectionDetails {
            endpoint: self.endpoint.clone(),
            use_tls: self.use_tls,
            access_key_id: self.access_key.clone(),
            secret_access_key: self.secret_key.clone(),
            region: self.region.clone(),
            ca_bundle,
        })
    }
}

/// One desired bucket.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BucketSpec {
    /// Bucket name: 3-63 characters of lowercase letters, digits, dots
    /// and hyphens, starting and ending with a letter or digit.
    #[garde(
        length(min = 3, max = 63),
        pattern(r"^[a-z0-9][a-z0-9.-]*[a-z0-9]$")
    )]
    pub name: String,

    /// Keep versioning enabled on the bucket.
    #[serde(default)]
    #[garde(skip)]
    pub versioning: bool,

    /// Create the bucket with object locking (creation-time-only).
    #[serde(default)]
    #[garde(skip)]
    pub object_locking: bool,
}

impl From<&BucketSpec> for DesiredBucket {
    fn from(spec: &BucketSpec) -> Self {
        DesiredBucket {
            name: spec.name.clone(),
            object_locking: spec.object_locking,
            versioning: spec.versioning,
        }
    }
}

/// Reconciliation / retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between periodic resync passes.  0 = single pass.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_seconds: u64,

    /// Backoff after the first failed cycle, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on backoff, in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_seconds: u64,

    /// Attempts per event within one convergence pass.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            resync_interval_seconds: default_resync_interval(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_seconds: default_retry_max_delay(),
            retry_max_attempts: default_retry_max_attempts(),
        }
    }
}

impl ReconcileConfig {
    /// Retry policy derived from this section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_secs(self.retry_max_delay_seconds),
            max_attempts: self.retry_max_attempts.max(1),
        }
    }

    /// Resync interval as a duration; zero means a single pass.
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus metrics exporter.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Listen address for the metrics endpoint.
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            listen: default_metrics_listen(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_store_backend() -> String {
    "s3".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_resync_interval() -> u64 {
    300
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    300
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9464".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load, parse, and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    config
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid configuration: {report}"))?;
    Ok(config)
}

// -- Tests -------------------------------------------------------------------
