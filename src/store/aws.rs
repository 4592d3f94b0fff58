//! S3-compatible object store client backed by the AWS SDK.
//!
//! Talks to any S3-compatible HTTP endpoint (AWS, Ceph RGW, MinIO, ...)
//! using static credentials and path-style addressing.  Optionally TLS
//! with a custom CA bundle for stores fronted by a private authority.
//!
//! One [`AwsObjectStore`] holds one pooled SDK client and is shared
//! across all reconciliation cycles for the life of the process.

use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration, Delete,
    ObjectIdentifier, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

use super::client::{ObjectPage, ObjectRemovalError, ObjectStore};
use crate::errors::EngineError;

/// Connection settings for an S3-compatible endpoint.
///
/// Immutable after construction; validated once before any store call
/// is attempted.
#[derive(Debug, Clone)]
pub struct ConnectionDetails {
    /// Host and port of the store endpoint, without a scheme
    /// (e.g. `s3.example.internal:443`).
    pub endpoint: String,
    /// Whether to speak TLS to the endpoint.
    pub use_tls: bool,
    /// Static access key ID.
    pub access_key_id: String,
    /// Static secret access key.
    pub secret_access_key: String,
    /// Region sent with bucket creation and request signing.
    pub region: String,
    /// Optional PEM bundle for a custom certificate authority.
    pub ca_bundle: Option<Vec<u8>>,
}

impl ConnectionDetails {
    /// Make sure the provided settings are usable.
    ///
    /// Fails with [`EngineError::InvalidConfiguration`] when the access
    /// key ID, secret access key, or endpoint is empty, or when a CA
    /// bundle was supplied but is empty.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.access_key_id.is_empty() {
            return Err(EngineError::InvalidConfiguration {
                reason: "access key ID is empty".to_string(),
            });
        }
        if self.secret_access_key.is_empty() {
            return Err(EngineError::InvalidConfiguration {
                reason: "secret access key is empty".to_string(),
            });
        }
        if self.endpoint.is_empty() {
            return Err(EngineError::InvalidConfiguration {
                reason: "endpoint is empty".to_string(),
            });
        }
        if let Some(ca) = &self.ca_bundle {
            if ca.is_empty() {
                return Err(EngineError::InvalidConfiguration {
                    reason: "CA bundle is present but empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Full endpoint URL including the scheme derived from `use_tls`.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.endpoint)
    }
}

/// Object store client for S3-compatible endpoints.
pub struct AwsObjectStore {
    /// AWS S3 SDK client (pooled HTTP connections).
    client: Client,
    /// Region used as a location constraint at bucket creation.
    region: String,
}

impl AwsObjectStore {
    /// Validate `details` and build a client for the endpoint.
    ///
    /// Credentials are injected statically; the endpoint is addressed
    /// path-style so bucket names never appear in DNS.  No store call
    /// is made here -- a bad endpoint surfaces on the first operation.
    pub async fn connect(details: ConnectionDetails) -> Result<Self, EngineError> {
        details.validate()?;

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(details.region.clone()))
            .endpoint_url(details.endpoint_url());

        let creds = aws_sdk_s3::config::Credentials::new(
            &details.access_key_id,
            &details.secret_access_key,
            None, // session_token
            None, // expiry
            "bucketkeeper-config",
        );
        config_loader = config_loader.credentials_provider(creds);

        if let Some(ca) = &details.ca_bundle {
            let http_client = Self::https_client_with_ca(ca.clone())?;
            config_loader = config_loader.http_client(http_client);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "object store client initialized: endpoint={} region={} tls={}",
            details.endpoint, details.region, details.use_tls
        );

        Ok(Self {
            client,
            region: details.region,
        })
    }

    /// Build an HTTPS client whose trust store contains only the
    /// supplied PEM bundle.
    fn https_client_with_ca(
        ca_pem: Vec<u8>,
    ) -> Result<aws_smithy_runtime_api::client::http::SharedHttpClient, EngineError> {
        use aws_smithy_http_client::tls;

        let trust_store = tls::TrustStore::empty().with_pem_certificate(ca_pem);
        let tls_context = tls::TlsContext::builder()
            .with_trust_store(trust_store)
            .build()
            .map_err(|e| EngineError::InvalidConfiguration {
                reason: format!("CA bundle rejected: {e}"),
            })?;

        Ok(aws_smithy_http_client::Builder::new()
            .tls_provider(tls::Provider::Rustls(
                tls::rustls_provider::CryptoMode::Ring,
            ))
            .tls_context(tls_context)
            .build_https())
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("S3 {context}: {err}")
    }
}

impl ObjectStore for AwsObjectStore {
    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("head_bucket: {}", bucket);

            match self.client.head_bucket().bucket(&bucket).send().await {
                Ok(_) => Ok(true),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(false)
                    } else {
                        Err(Self::map_sdk_error("head_bucket", service_err))
                    }
                }
            }
        })
    }

    fn create_bucket(
        &self,
        bucket: &str,
        object_locking: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!(
                "create_bucket: {} object_locking={} region={}",
                bucket, object_locking, self.region
            );

            let mut req = self.client.create_bucket().bucket(&bucket);

            if object_locking {
                req = req.object_lock_enabled_for_bucket(true);
            }

            // us-east-1 is the implicit default; sending it as an
            // explicit constraint is rejected by AWS.
            if self.region != "us-east-1" {
                let constraint = BucketLocationConstraint::from(self.region.as_str());
                req = req.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(constraint)
                        .build(),
                );
            }

            req.send()
                .await
                .map_err(|e| Self::map_sdk_error("create_bucket", e.into_service_error()))?;

            Ok(())
        })
    }

    fn versioning_enabled(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("get_bucket_versioning: {}", bucket);

            let resp = self
                .client
                .get_bucket_versioning()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("get_bucket_versioning", e))?;

            Ok(matches!(resp.status(), Some(BucketVersioningStatus::Enabled)))
        })
    }

    fn enable_versioning(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("put_bucket_versioning: {} -> Enabled", bucket);

            self.client
                .put_bucket_versioning()
                .bucket(&bucket)
                .versioning_configuration(
                    VersioningConfiguration::builder()
                        .status(BucketVersioningStatus::Enabled)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_bucket_versioning", e))?;

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
            debug!(
                "list_objects_v2: {} continuation={}",
                bucket,
                continuation.as_deref().unwrap_or("<start>")
            );

            let mut req = self.client.list_objects_v2().bucket(&bucket);
            if let Some(ref token) = continuation {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("list_objects_v2", e))?;

            let keys = resp
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(str::to_string))
                .collect();

            let next_token = if resp.is_truncated() == Some(true) {
                resp.next_continuation_token().map(str::to_string)
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
            if keys.is_empty() {
                return Ok(Vec::new());
            }

            debug!("delete_objects: {} ({} keys)", bucket, keys.len());

            let objects: Vec<ObjectIdentifier> = keys
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| Self::map_sdk_error("object identifier build", e))
                })
                .collect::<anyhow::Result<_>>()?;

            // quiet=false so the store reports every per-object failure.
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(false)
                .build()
                .map_err(|e| Self::map_sdk_error("delete_objects build", e))?;

            let resp = self
                .client
                .delete_objects()
                .bucket(&bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_objects", e))?;

            let failures = resp
                .errors()
                .iter()
                .map(|err| ObjectRemovalError {
                    key: err.key().unwrap_or("").to_string(),
                    message: format!(
                        "{}: {}",
                        err.code().unwrap_or("Unknown"),
                        err.message().unwrap_or("no message")
                    ),
                })
                .collect();

            Ok(failures)
        })
    }

    fn remove_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("delete_bucket: {}", bucket);

            self.client
                .delete_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_bucket", e))?;

            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> ConnectionDetails {
        ConnectionDetails {
            endpoint: "s3.example.internal:443".to_string(),
            use_tls: true,
            access_key_id: "AKID".to_string(),
            secret_access_key: "SECRET".to_string(),
            region: "us-east-1".to_string(),
            ca_bundle: None,
        }
    }

    #[test]
    fn test_validate_accepts_complete_details() {
        assert!(details().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_access_key() {
        let mut d = details();
        d.access_key_id.clear();
        assert!(matches!(
            d.validate(),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_secret_key() {
        let mut d = details();
        d.secret_access_key.clear();
        assert!(matches!(
            d.validate(),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_endpoint() {
        let mut d = details();
        d.endpoint.clear();
        assert!(matches!(
            d.validate(),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_ca_bundle() {
        let mut d = details();
        d.ca_bundle = Some(Vec::new());
        assert!(matches!(
            d.validate(),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_endpoint_url_scheme_follows_tls_flag() {
        let mut d = details();
        assert_eq!(d.endpoint_url(), "https://s3.example.internal:443");
        d.use_tls = false;
        d.endpoint = "127.0.0.1:9000".to_string();
        assert_eq!(d.endpoint_url(), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_details_before_any_call() {
        let mut d = details();
        d.secret_access_key.clear();
        let err = AwsObjectStore::connect(d).await.err();
        assert!(matches!(
            err,
            Some(EngineError::InvalidConfiguration { .. })
        ));
    }
}
