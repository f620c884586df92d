//! Shared test doubles for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bundle_uploadr::config::{Credentials, Provider};
use bundle_uploadr::storage::{
    Bucket, ObjectMetadata, ObjectUploadOptions, StorageClient, StorageClientFactory,
    StorageError, StorageSettings,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded `Bucket::upload` call
#[derive(Debug, Clone)]
pub struct UploadCall {
    pub bucket: String,
    pub local_path: PathBuf,
    pub options: ObjectUploadOptions,
}

/// Bucket that records every call and tracks how many run at once
pub struct RecordingBucket {
    name: String,
    delay: Duration,
    existing: Vec<String>,
    calls: Mutex<Vec<UploadCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingBucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::from_millis(5),
            existing: Vec::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Keys that reject conditional writes
    pub fn with_existing(mut self, keys: &[&str]) -> Self {
        self.existing = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<UploadCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bucket for RecordingBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        local_path: &Path,
        options: &ObjectUploadOptions,
    ) -> Result<ObjectMetadata, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.calls.lock().unwrap().push(UploadCall {
            bucket: self.name.clone(),
            local_path: local_path.to_path_buf(),
            options: options.clone(),
        });
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if options.if_absent && self.existing.contains(&options.destination) {
            return Err(StorageError::PreconditionFailed(options.destination.clone()));
        }

        let bytes_written = tokio::fs::metadata(local_path).await?.len();
        Ok(ObjectMetadata {
            etag: Some("\"etag\"".into()),
            generation: Some("1".into()),
            bytes_written,
        })
    }
}

struct SharedBucketClient {
    bucket: Arc<RecordingBucket>,
}

impl StorageClient for SharedBucketClient {
    fn bucket(&self, _name: &str) -> Arc<dyn Bucket> {
        self.bucket.clone()
    }
}

/// One recorded `StorageClientFactory::connect` call
#[derive(Debug, Clone)]
pub struct ConnectCall {
    pub provider: Provider,
    pub credentials: serde_json::Value,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub timeout: Option<std::time::Duration>,
}

/// Factory that hands out one shared [`RecordingBucket`]
pub struct RecordingFactory {
    pub bucket: Arc<RecordingBucket>,
    connects: Mutex<Vec<ConnectCall>>,
}

impl RecordingFactory {
    pub fn new(bucket: RecordingBucket) -> Self {
        Self {
            bucket: Arc::new(bucket),
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> Vec<ConnectCall> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClientFactory for RecordingFactory {
    async fn connect(
        &self,
        provider: Provider,
        credentials: &Credentials,
        settings: &StorageSettings,
    ) -> Result<Arc<dyn StorageClient>, StorageError> {
        self.connects.lock().unwrap().push(ConnectCall {
            provider,
            credentials: credentials.to_value(),
            endpoint: settings.endpoint.clone(),
            region: settings.region.clone(),
            timeout: settings.timeout,
        });
        Ok(Arc::new(SharedBucketClient {
            bucket: self.bucket.clone(),
        }))
    }
}

/// Write `count` small files named `file-<n>.txt` under `dir`
pub fn write_files(dir: &Path, count: usize) {
    for n in 0..count {
        std::fs::write(dir.join(format!("file-{}.txt", n)), format!("content {}", n)).unwrap();
    }
}
