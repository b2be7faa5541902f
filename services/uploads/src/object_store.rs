use crate::config::{AccessPolicy, S3Config};
use crate::model::SignedUrl;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("failed to write object {path}: {reason}")]
    Put { path: String, reason: String },

    #[error("failed to sign url for {path}: {reason}")]
    Sign { path: String, reason: String },

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Blob storage used by the upload pipeline and resolver
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `path`
    async fn put(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
        access: AccessPolicy,
    ) -> Result<(), ObjectStoreError>;

    /// Mint a GET URL for `path` valid for `ttl`
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<SignedUrl, ObjectStoreError>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 client for the configured bucket
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    /// Check that the bucket exists and is reachable with our credentials
    pub async fn probe(&self) -> Result<(), ObjectStoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Unavailable(format!("{}: {}", self.bucket, e)))?;

        Ok(())
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
        access: AccessPolicy,
    ) -> Result<(), ObjectStoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(body));

        if access == AccessPolicy::Private {
            request = request.acl(ObjectCannedAcl::Private);
        }

        request.send().await.map_err(|e| ObjectStoreError::Put {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        debug!(path = %path, "Object stored");
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<SignedUrl, ObjectStoreError> {
        self.presign_get(path, ttl, SystemTime::now()).await
    }
}

impl S3ObjectStore {
    /// Presign a GET as of `signed_at`. SigV4 stamps the signing time with
    /// one-second precision, so URLs signed within the same second are equal.
    async fn presign_get(
        &self,
        path: &str,
        ttl: Duration,
        signed_at: SystemTime,
    ) -> Result<SignedUrl, ObjectStoreError> {
        let sign_error = |reason: String| ObjectStoreError::Sign {
            path: path.to_string(),
            reason,
        };

        let presigning_config = PresigningConfig::builder()
            .start_time(signed_at)
            .expires_in(ttl)
            .build()
            .map_err(|e| sign_error(e.to_string()))?;
        let validity = chrono::Duration::from_std(ttl).map_err(|e| sign_error(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning_config)
            .await
            .map_err(|e| sign_error(e.to_string()))?;

        Ok(SignedUrl {
            url: presigned.uri().to_string(),
            expires_at: DateTime::<Utc>::from(signed_at) + validity,
        })
    }
}
