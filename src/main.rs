//! Bundle Uploadr - upload a build output directory to a cloud bucket
//!
//! Runs the upload plugin once from the command line, for build pipelines
//! that have no plugin host.

use anyhow::Context;
use bundle_uploadr::config::{ConfigLoader, PluginOptions};
use bundle_uploadr::progress::{LogProgress, ProgressReporter, SpinnerProgress};
use bundle_uploadr::{metrics, UploadPlugin};
use clap::{Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Bundle Uploadr - upload every file of a build output directory to a bucket
#[derive(Parser, Debug)]
#[command(name = "bundle-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "BUNDLE_UPLOADR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory to upload
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Destination bucket
    #[arg(short, long)]
    bucket: Option<String>,

    /// Credentials as inline JSON
    #[arg(long, env = "BUNDLE_UPLOADR_SERVICE_KEY_JSON", hide_env_values = true)]
    service_key_json: Option<String>,

    /// File holding the credentials JSON. Takes precedence over
    /// --service-key-json and its environment variable.
    #[arg(long)]
    credentials_file: Option<PathBuf>,

    /// Maximum uploads in flight
    #[arg(long)]
    concurrency: Option<i64>,

    /// Storage provider (gcs, s3)
    #[arg(long)]
    provider: Option<String>,

    /// Custom storage API endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// S3 region
    #[arg(long)]
    region: Option<String>,

    /// Per-request storage timeout in seconds
    #[arg(long)]
    timeout_secs: Option<i64>,

    /// Overwrite objects that already exist
    #[arg(long)]
    overwrite: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Disable the terminal spinner
    #[arg(long)]
    no_progress: bool,

    /// Write Prometheus metrics to this file when done
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

impl Args {
    /// Options given on the command line, to layer over the config file
    fn overrides(&self) -> anyhow::Result<PluginOptions> {
        let service_key_json = match (&self.credentials_file, &self.service_key_json) {
            (Some(path), _) => {
                let content = std::fs::read_to_string(path).with_context(|| {
                    format!("Failed to read credentials file {}", path.display())
                })?;
                Some(serde_json::Value::String(content))
            }
            (None, Some(json)) => Some(serde_json::Value::String(json.clone())),
            (None, None) => None,
        };

        Ok(PluginOptions {
            directory: self.directory.clone(),
            bucket_name: self.bucket.clone(),
            service_key_json,
            concurrency: self.concurrency,
            skip_if_exists: self.overwrite.then_some(false),
            provider: self.provider.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting Bundle Uploadr v{}", bundle_uploadr::VERSION);

    // Load configuration
    let file_options = match &args.config {
        Some(path) => {
            let options = ConfigLoader::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            info!("Loaded configuration from {:?}", path);
            options
        }
        None => PluginOptions::default(),
    };
    let options = file_options.merge(args.overrides()?);

    let progress: Box<dyn ProgressReporter> =
        if args.no_progress || !std::io::stderr().is_terminal() {
            Box::new(LogProgress)
        } else {
            Box::new(SpinnerProgress::new())
        };

    let plugin = UploadPlugin::new(options);
    let result = plugin.write_bundle(progress.as_ref()).await;

    if let Some(path) = &args.metrics_file {
        let text = metrics::render().context("Failed to render metrics")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    let summary = result?;
    info!(
        uploaded = summary.uploaded,
        skipped = summary.skipped,
        failed = summary.failed,
        "Done"
    );

    Ok(())
}
