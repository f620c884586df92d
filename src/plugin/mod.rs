//! Plugin hook
//!
//! [`UploadPlugin::write_bundle`] is called once by the host after the build
//! output is written. It runs these steps in order:
//!
//! 1. validate the options (no progress is reported on failure)
//! 2. start progress with `Uploading files from <dir> to <bucket>`
//! 3. enumerate every file under the directory
//! 4. connect the storage client and open the bucket
//! 5. upload with bounded concurrency and report the tally
//!
//! A failure in steps 3 and 4 marks the progress as failed and is returned to
//! the host unchanged. Per-file upload failures only show up in the tally.

use crate::config::{ConfigError, PluginOptions, Provider};
use crate::progress::ProgressReporter;
use crate::scan::{self, ScanError};
use crate::storage::{DefaultStorageFactory, StorageClientFactory, StorageError, StorageSettings};
use crate::upload::{
    build_tasks, BucketUploader, CoordinatorError, Preconditions, UploadCoordinator,
    UploadSummary,
};
use std::sync::Arc;
use thiserror::Error;

/// Name the plugin registers under
pub const PLUGIN_NAME: &str = "google-cloud-storage";

/// Fatal plugin errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] ScanError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// Build-tool plugin that uploads the output directory to a bucket
pub struct UploadPlugin {
    options: PluginOptions,
    factory: Arc<dyn StorageClientFactory>,
}

impl UploadPlugin {
    /// Create a plugin using the built-in storage clients
    pub fn new(options: PluginOptions) -> Self {
        Self::with_factory(options, Arc::new(DefaultStorageFactory))
    }

    /// Create a plugin with a custom storage client factory
    pub fn with_factory(options: PluginOptions, factory: Arc<dyn StorageClientFactory>) -> Self {
        Self { options, factory }
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    /// Upload every file in the configured directory
    #[tracing::instrument(name = "plugin.write_bundle", skip_all, err)]
    pub async fn write_bundle(
        &self,
        progress: &dyn ProgressReporter,
    ) -> Result<UploadSummary, PluginError> {
        let config = self.options.clone().validate()?;

        progress.start(&format!(
            "Uploading files from {} to {}",
            config.directory.display(),
            config.bucket_name
        ));

        let provider = config.provider;
        let settings = StorageSettings {
            endpoint: config.endpoint.clone(),
            region: config.region.clone(),
            timeout: config.timeout,
            ..Default::default()
        };
        let preconditions = Preconditions {
            if_absent: config.skip_if_exists,
        };

        let result = async {
            let files = scan::scan_directory_async(config.directory.clone()).await?;
            tracing::info!(
                directory = %config.directory.display(),
                files = files.len(),
                "Found files to upload"
            );

            let client = self
                .factory
                .connect(provider, &config.credentials, &settings)
                .await?;
            let uploader = BucketUploader::new(client.bucket(&config.bucket_name));
            let coordinator = UploadCoordinator::new(config.concurrency)?;

            let tasks = build_tasks(&config.directory, files);
            Ok::<_, PluginError>(
                coordinator
                    .run(tasks, &uploader, preconditions, progress)
                    .await,
            )
        }
        .await;

        match result {
            Ok(summary) => {
                tracing::info!(
                    bucket = %config.bucket_name,
                    uploaded = summary.uploaded,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    bytes = summary.bytes_uploaded,
                    "Upload finished"
                );
                progress.succeed(&format!(
                    "{} files uploaded, {} skipped",
                    summary.uploaded, summary.skipped
                ));
                Ok(summary)
            }
            Err(e) => {
                progress.fail(&failure_message(provider));
                Err(e)
            }
        }
    }
}

fn failure_message(provider: Provider) -> String {
    format!(
        "Something went wrong uploading the files to {}",
        provider.display_name()
    )
}
