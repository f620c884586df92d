//! Upload coordinator
//!
//! Runs a batch of independent uploads with at most `concurrency` in flight.
//!
//! The in-flight uploads are futures polled by a single task through
//! [`buffer_unordered`](futures::StreamExt::buffer_unordered): a new upload
//! starts as soon as one of the slots frees up. Every upload settles before
//! [`UploadCoordinator::run`] returns and a failing upload never stops the
//! others. Each settled task yields an [`UploadOutcome`] that is folded into
//! the [`UploadSummary`], so nothing is shared between tasks.

use super::{ObjectUploader, Preconditions, SkipReason, UploadOutcome, UploadSummary, UploadTask};
use crate::progress::ProgressReporter;
use futures::stream::{self, StreamExt};
use thiserror::Error;

/// Coordinator errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Invalid concurrency {0}: at least one upload must be allowed in flight")]
    InvalidConcurrency(usize),
}

/// Bounded-concurrency upload runner
#[derive(Debug, Clone, Copy)]
pub struct UploadCoordinator {
    concurrency: usize,
}

impl UploadCoordinator {
    /// Create a coordinator allowing `concurrency` uploads in flight
    pub fn new(concurrency: usize) -> Result<Self, CoordinatorError> {
        if concurrency == 0 {
            return Err(CoordinatorError::InvalidConcurrency(concurrency));
        }
        Ok(Self { concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Upload every task and return the tally.
    ///
    /// Completion order is unspecified. After each task settles the progress
    /// text becomes `uploaded <path>` or `skipped <path>`.
    pub async fn run<U>(
        &self,
        tasks: Vec<UploadTask>,
        uploader: &U,
        preconditions: Preconditions,
        progress: &dyn ProgressReporter,
    ) -> UploadSummary
    where
        U: ObjectUploader + ?Sized,
    {
        let mut summary = UploadSummary::default();
        if tasks.is_empty() {
            return summary;
        }

        tracing::debug!(
            tasks = tasks.len(),
            concurrency = self.concurrency,
            if_absent = preconditions.if_absent,
            "Starting upload batch"
        );

        let mut settled = stream::iter(tasks)
            .map(|task| async move {
                let result = uploader.upload(&task, preconditions).await;
                (task, UploadOutcome::from(result))
            })
            .buffer_unordered(self.concurrency);

        while let Some((task, outcome)) = settled.next().await {
            let path = task.source_path().display();
            match &outcome {
                UploadOutcome::Uploaded(receipt) => {
                    tracing::debug!(
                        file = %path,
                        destination = %task.destination_key(),
                        bytes = receipt.bytes_written,
                        "Uploaded file"
                    );
                    progress.set_text(&format!("uploaded {}", path));
                }
                UploadOutcome::Skipped(SkipReason::AlreadyExists) => {
                    tracing::info!(
                        file = %path,
                        destination = %task.destination_key(),
                        "Skipped file, object already exists"
                    );
                    progress.set_text(&format!("skipped {}", path));
                }
                UploadOutcome::Skipped(SkipReason::Failed(error)) => {
                    tracing::warn!(
                        file = %path,
                        destination = %task.destination_key(),
                        error = %error,
                        "Skipped file, upload failed"
                    );
                    progress.set_text(&format!("skipped {}", path));
                }
            }
            summary.record(&outcome);
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, RecordingProgress};
    use crate::storage::StorageError;
    use crate::upload::{UploadError, UploadReceipt};
    use async_trait::async_trait;

    /// Fails every task whose key contains "fail", reports "exists" keys as
    /// already present, uploads the rest.
    struct ScriptedUploader;

    #[async_trait]
    impl ObjectUploader for ScriptedUploader {
        async fn upload(
            &self,
            task: &UploadTask,
            _preconditions: Preconditions,
        ) -> Result<UploadReceipt, UploadError> {
            let key = task.destination_key();
            if key.contains("fail") {
                Err(StorageError::RequestError("connection reset".into()).into())
            } else if key.contains("exists") {
                Err(UploadError::AlreadyExists(key.to_string()))
            } else {
                Ok(UploadReceipt {
                    etag: Some("\"abc\"".into()),
                    bytes_written: 4,
                })
            }
        }
    }

    fn task(name: &str) -> UploadTask {
        UploadTask::new(format!("dist/{}", name), format!("/{}", name))
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert_eq!(
            UploadCoordinator::new(0).unwrap_err(),
            CoordinatorError::InvalidConcurrency(0)
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let coordinator = UploadCoordinator::new(3).unwrap();
        let progress = RecordingProgress::new();
        let summary = coordinator
            .run(vec![], &ScriptedUploader, Preconditions::default(), &progress)
            .await;
        assert_eq!(summary, UploadSummary::default());
        assert!(progress.events().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_outcomes_are_counted() {
        let coordinator = UploadCoordinator::new(2).unwrap();
        let progress = RecordingProgress::new();
        let tasks = vec![task("a.js"), task("exists.css"), task("fail.html"), task("b.js")];

        let summary = coordinator
            .run(tasks, &ScriptedUploader, Preconditions { if_absent: true }, &progress)
            .await;

        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes_uploaded, 8);

        let mut texts: Vec<_> = progress
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Text(text) => Some(text),
                _ => None,
            })
            .collect();
        texts.sort();
        assert_eq!(
            texts,
            vec![
                "skipped dist/exists.css",
                "skipped dist/fail.html",
                "uploaded dist/a.js",
                "uploaded dist/b.js",
            ]
        );
    }
}
