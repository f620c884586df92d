//! Bucket uploader
//!
//! Adapts a storage [`Bucket`] to the coordinator's [`ObjectUploader`] seam.

use super::{ObjectUploader, Preconditions, UploadError, UploadReceipt, UploadTask};
use crate::metrics;
use crate::storage::{Bucket, ObjectUploadOptions, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Uploads tasks to one bucket
pub struct BucketUploader {
    bucket: Arc<dyn Bucket>,
}

impl BucketUploader {
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        Self { bucket }
    }

    pub fn bucket_name(&self) -> &str {
        self.bucket.name()
    }
}

/// Content type for a file, from its extension
fn content_type_for(task: &UploadTask) -> Option<String> {
    mime_guess::from_path(task.source_path())
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[async_trait]
impl ObjectUploader for BucketUploader {
    #[tracing::instrument(
        name = "upload.object",
        skip(self, task, preconditions),
        fields(
            bucket = %self.bucket.name(),
            key = %task.destination_key(),
            if_absent = preconditions.if_absent,
            upload.bytes_written = tracing::field::Empty
        )
    )]
    async fn upload(
        &self,
        task: &UploadTask,
        preconditions: Preconditions,
    ) -> Result<UploadReceipt, UploadError> {
        let bucket = self.bucket.name();
        let options = ObjectUploadOptions {
            destination: task.destination_key().to_string(),
            if_absent: preconditions.if_absent,
            content_type: content_type_for(task),
        };
        let start_time = Instant::now();

        let result = self.bucket.upload(task.source_path(), &options).await;

        let duration = start_time.elapsed();
        metrics::record_upload_duration(bucket, duration.as_secs_f64());

        match result {
            Ok(metadata) => {
                metrics::record_upload_success(bucket, metadata.bytes_written);
                tracing::Span::current().record("upload.bytes_written", metadata.bytes_written);
                tracing::debug!(
                    etag = ?metadata.etag,
                    duration_ms = duration.as_millis(),
                    "Object upload completed"
                );

                Ok(UploadReceipt {
                    etag: metadata.etag,
                    bytes_written: metadata.bytes_written,
                })
            }
            Err(StorageError::PreconditionFailed(key)) => {
                metrics::record_upload_already_exists(bucket);
                Err(UploadError::AlreadyExists(key))
            }
            Err(e) => {
                metrics::record_upload_failure(bucket);
                tracing::debug!(
                    error = %e,
                    duration_ms = duration.as_millis(),
                    "Object upload failed"
                );
                Err(e.into())
            }
        }
    }
}
