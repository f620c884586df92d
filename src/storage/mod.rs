//! Storage collaborators
//!
//! The uploader only ever talks to these traits:
//!
//! - [`StorageClientFactory`] builds a client from parsed credentials
//! - [`StorageClient::bucket`] hands out a bucket handle
//! - [`Bucket::upload`] puts one local file at a destination key
//!
//! Two clients ship with the crate: [`gcs::GcsClient`] (Google Cloud Storage
//! JSON API with a service account key) and [`s3::S3Client`] (AWS SDK, also
//! usable against S3-compatible services through a custom endpoint).
//!
//! # Preconditions
//!
//! When [`ObjectUploadOptions::if_absent`] is set the write must be rejected
//! if the object already exists. GCS expresses this as
//! `ifGenerationMatch=0`, S3 as `If-None-Match: *`. Either way a rejection
//! surfaces as [`StorageError::PreconditionFailed`].

use crate::config::{Credentials, Provider};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod gcs;
pub mod s3;

pub use gcs::GcsClient;
pub use s3::S3Client;

/// Storage client errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Precondition failed: object '{0}' already exists")]
    PreconditionFailed(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Response error ({status}): {message}")]
    ResponseError { status: u16, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Retry policy for transient failures (429 and 5xx)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Default timeout for a single storage request, token requests included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for opening a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client settings that are not credentials
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub retry: RetryPolicy,
    /// Per-attempt request timeout (default: [`DEFAULT_REQUEST_TIMEOUT`])
    pub timeout: Option<Duration>,
}

impl StorageSettings {
    /// Effective per-attempt request timeout
    pub fn request_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Connect timeout, never longer than the request timeout
    pub fn connect_timeout(&self) -> Duration {
        DEFAULT_CONNECT_TIMEOUT.min(self.request_timeout())
    }
}

/// Options for a single object upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUploadOptions {
    /// Object key in the bucket
    pub destination: String,
    /// Reject the write if the object already exists
    pub if_absent: bool,
    pub content_type: Option<String>,
}

/// What the storage service reported about a stored object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub etag: Option<String>,
    pub generation: Option<String>,
    pub bytes_written: u64,
}

/// A bucket that accepts uploads
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Bucket name
    fn name(&self) -> &str;

    /// Upload the file at `local_path`
    async fn upload(
        &self,
        local_path: &Path,
        options: &ObjectUploadOptions,
    ) -> Result<ObjectMetadata, StorageError>;
}

/// A connected storage client
pub trait StorageClient: Send + Sync {
    /// Handle for the named bucket. Does no I/O.
    fn bucket(&self, name: &str) -> Arc<dyn Bucket>;
}

/// Builds storage clients from credentials
#[async_trait]
pub trait StorageClientFactory: Send + Sync {
    async fn connect(
        &self,
        provider: Provider,
        credentials: &Credentials,
        settings: &StorageSettings,
    ) -> Result<Arc<dyn StorageClient>, StorageError>;
}

/// Factory for the clients that ship with the crate
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStorageFactory;

#[async_trait]
impl StorageClientFactory for DefaultStorageFactory {
    async fn connect(
        &self,
        provider: Provider,
        credentials: &Credentials,
        settings: &StorageSettings,
    ) -> Result<Arc<dyn StorageClient>, StorageError> {
        match provider {
            Provider::Gcs => Ok(Arc::new(GcsClient::from_credentials(credentials, settings)?)),
            Provider::S3 => Ok(Arc::new(S3Client::connect(credentials, settings).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_settings_timeouts() {
        let defaults = StorageSettings::default();
        assert_eq!(defaults.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(defaults.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);

        let short = StorageSettings {
            timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        assert_eq!(short.request_timeout(), Duration::from_secs(2));
        assert_eq!(short.connect_timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_default_factory_rejects_incomplete_gcs_key() {
        let credentials = Credentials::from_value(json!({"some": "key"})).unwrap();
        let result = DefaultStorageFactory
            .connect(Provider::Gcs, &credentials, &StorageSettings::default())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn test_default_factory_rejects_incomplete_s3_keys() {
        let credentials = Credentials::from_value(json!({"access_key_id": "AKIA"})).unwrap();
        let result = DefaultStorageFactory
            .connect(Provider::S3, &credentials, &StorageSettings::default())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidCredentials(_))));
    }
}
