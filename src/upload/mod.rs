//! Upload module
//!
//! Turns scanned files into [`UploadTask`]s and drives them through an
//! [`ObjectUploader`] with bounded concurrency.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::storage::StorageError;

pub mod adapter;
pub mod coordinator;

pub use adapter::BucketUploader;
pub use coordinator::{CoordinatorError, UploadCoordinator};

/// Upload errors
///
/// Never fatal for a batch: the coordinator counts them as skipped.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One file to upload and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    source_path: PathBuf,
    destination_key: String,
}

impl UploadTask {
    pub fn new(source_path: impl Into<PathBuf>, destination_key: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_key: destination_key.into(),
        }
    }

    /// Build a task for a scanned file by stripping the root prefix.
    ///
    /// The key keeps a leading `/` and always uses `/` separators, so
    /// `dist/js/app.js` under root `dist` becomes `/js/app.js`.
    pub fn from_scanned(root: &Path, source_path: PathBuf) -> Self {
        let relative = source_path.strip_prefix(root).unwrap_or(&source_path);

        let mut destination_key = String::new();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                destination_key.push('/');
                // Scanned paths are UTF-8; the scanner rejects anything else
                destination_key.push_str(&part.to_string_lossy());
            }
        }

        Self {
            destination_key,
            source_path,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn destination_key(&self) -> &str {
        &self.destination_key
    }
}

/// Build upload tasks for every scanned file under `root`
pub fn build_tasks(root: &Path, files: Vec<PathBuf>) -> Vec<UploadTask> {
    files
        .into_iter()
        .map(|file| UploadTask::from_scanned(root, file))
        .collect()
}

/// Conditions attached to every write in a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preconditions {
    /// Only write objects that do not exist yet
    pub if_absent: bool,
}

/// Successful upload receipt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    pub etag: Option<String>,
    pub bytes_written: u64,
}

/// Uploads a single task
///
/// This is the seam between the coordinator and a storage service; tests
/// replace it with doubles.
#[async_trait::async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(
        &self,
        task: &UploadTask,
        preconditions: Preconditions,
    ) -> Result<UploadReceipt, UploadError>;
}

/// Why a task was counted as skipped
#[derive(Debug)]
pub enum SkipReason {
    /// The precondition rejected the write
    AlreadyExists,
    /// Any other failure
    Failed(UploadError),
}

/// How one task settled
#[derive(Debug)]
pub enum UploadOutcome {
    Uploaded(UploadReceipt),
    Skipped(SkipReason),
}

impl From<Result<UploadReceipt, UploadError>> for UploadOutcome {
    fn from(result: Result<UploadReceipt, UploadError>) -> Self {
        match result {
            Ok(receipt) => UploadOutcome::Uploaded(receipt),
            Err(UploadError::AlreadyExists(_)) => UploadOutcome::Skipped(SkipReason::AlreadyExists),
            Err(e) => UploadOutcome::Skipped(SkipReason::Failed(e)),
        }
    }
}

/// Final tally of a batch
///
/// `uploaded + skipped` equals the number of tasks. `failed` is the part of
/// `skipped` caused by errors other than the object already existing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
}

impl UploadSummary {
    /// Fold one settled task into the tally
    pub fn record(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded(receipt) => {
                self.uploaded += 1;
                self.bytes_uploaded += receipt.bytes_written;
            }
            UploadOutcome::Skipped(SkipReason::AlreadyExists) => self.skipped += 1,
            UploadOutcome::Skipped(SkipReason::Failed(_)) => {
                self.skipped += 1;
                self.failed += 1;
            }
        }
    }

    /// Tasks that settled
    pub fn total(&self) -> usize {
        self.uploaded + self.skipped
    }
}
