//! Configuration module for Bundle Uploadr
//!
//! Options arrive loosely typed (a YAML file, CLI flags, or a host tool
//! building [`PluginOptions`] by hand) and are turned into a [`Config`] by
//! [`PluginOptions::validate`]. Validation is pure: it never touches the
//! filesystem or the network, and it reports every problem at once.
//!
//! # Example
//!
//! ```
//! use bundle_uploadr::config::PluginOptions;
//!
//! let options = PluginOptions {
//!     bucket_name: Some("my-bucket".into()),
//!     service_key_json: Some(serde_json::json!(r#"{"some":"key"}"#)),
//!     ..Default::default()
//! };
//!
//! let config = options.validate().unwrap();
//! assert_eq!(config.directory.to_str(), Some("dist"));
//! assert_eq!(config.concurrency, 5);
//! assert!(config.skip_if_exists);
//! assert_eq!(config.credentials.get_str("some"), Some("key"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Directory uploaded when none is configured
pub const DEFAULT_DIRECTORY: &str = "dist";

/// Uploads in flight when no concurrency is configured
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {}", join_field_errors(.0))]
    ValidationError(Vec<FieldError>),
}

impl ConfigError {
    /// Field errors carried by a validation failure, empty otherwise
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ConfigError::ValidationError(errors) => errors,
            _ => &[],
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single missing or malformed option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Storage service the bucket lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Cloud Storage, authenticated with a service account key
    #[default]
    Gcs,
    /// Amazon S3 or any S3-compatible service
    S3,
}

impl Provider {
    /// Human readable name used in progress messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Gcs => "Google Cloud Storage",
            Provider::S3 => "S3",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gcs" | "google" | "google-cloud-storage" => Ok(Provider::Gcs),
            "s3" | "aws" => Ok(Provider::S3),
            other => Err(format!("must be 'gcs' or 's3', got '{}'", other)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gcs => f.write_str("gcs"),
            Provider::S3 => f.write_str("s3"),
        }
    }
}

/// Parsed storage credentials
///
/// Always a JSON object. What keys it needs depends on the provider and is
/// checked when the storage client is built, not here. `Debug` only prints
/// the key names.
#[derive(Clone, PartialEq)]
pub struct Credentials(Map<String, Value>);

impl Credentials {
    /// Normalize a credentials value: objects are taken as-is, strings are
    /// parsed as JSON and must hold an object.
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Ok(Self(map)),
                Ok(_) => Err("must be a JSON object".to_string()),
                Err(e) => Err(format!("is not valid JSON: {}", e)),
            },
            _ => Err("must be a JSON object or a string containing one".to_string()),
        }
    }

    /// The underlying key/value map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Owned JSON value, for deserializing provider-specific key formats
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// String entry lookup
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Loosely typed options, as written in a config file or passed by a host
///
/// Every field is optional here; [`PluginOptions::validate`] decides what is
/// required. Keys are accepted in snake_case and in the camelCase spelling
/// used by the JavaScript build-tool plugins (`bucketName`,
/// `serviceKeyJson`, `skipIfExists`).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct PluginOptions {
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default, alias = "bucketName")]
    pub bucket_name: Option<String>,

    /// Credentials as a JSON object, or a string containing one
    #[serde(default, alias = "serviceKeyJson", alias = "credentials")]
    pub service_key_json: Option<Value>,

    #[serde(default)]
    pub concurrency: Option<i64>,

    #[serde(default, alias = "skipIfExists")]
    pub skip_if_exists: Option<bool>,

    #[serde(default)]
    pub provider: Option<String>,

    /// Custom API endpoint (emulators, S3-compatible services)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// S3 region, ignored for GCS
    #[serde(default)]
    pub region: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default, alias = "timeoutSecs")]
    pub timeout_secs: Option<i64>,
}

impl fmt::Debug for PluginOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginOptions")
            .field("directory", &self.directory)
            .field("bucket_name", &self.bucket_name)
            .field(
                "service_key_json",
                &self.service_key_json.as_ref().map(|_| "<redacted>"),
            )
            .field("concurrency", &self.concurrency)
            .field("skip_if_exists", &self.skip_if_exists)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl PluginOptions {
    /// Layer `overrides` on top of these options; set fields win.
    pub fn merge(self, overrides: PluginOptions) -> PluginOptions {
        PluginOptions {
            directory: overrides.directory.or(self.directory),
            bucket_name: overrides.bucket_name.or(self.bucket_name),
            service_key_json: overrides.service_key_json.or(self.service_key_json),
            concurrency: overrides.concurrency.or(self.concurrency),
            skip_if_exists: overrides.skip_if_exists.or(self.skip_if_exists),
            provider: overrides.provider.or(self.provider),
            endpoint: overrides.endpoint.or(self.endpoint),
            region: overrides.region.or(self.region),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
        }
    }

    /// Apply defaults, normalize credentials, and check every field.
    ///
    /// Returns all problems found, not just the first one.
    pub fn validate(self) -> Result<Config, ConfigError> {
        let mut errors = Vec::new();

        let directory = self
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIRECTORY));
        if directory.as_os_str().is_empty() {
            errors.push(FieldError::new("directory", "must not be empty"));
        }

        let bucket_name = match self.bucket_name.map(|name| name.trim().to_string()) {
            Some(name) if !name.is_empty() => Some(name),
            Some(_) => {
                errors.push(FieldError::new("bucket_name", "must not be empty"));
                None
            }
            None => {
                errors.push(FieldError::new("bucket_name", "is required"));
                None
            }
        };

        let credentials = match self.service_key_json {
            Some(value) => match Credentials::from_value(value) {
                Ok(credentials) => Some(credentials),
                Err(message) => {
                    errors.push(FieldError::new("service_key_json", message));
                    None
                }
            },
            None => {
                errors.push(FieldError::new("service_key_json", "is required"));
                None
            }
        };

        let concurrency = match self.concurrency {
            None => DEFAULT_CONCURRENCY,
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            Some(n) => {
                errors.push(FieldError::new(
                    "concurrency",
                    format!("must be a positive integer, got {}", n),
                ));
                DEFAULT_CONCURRENCY
            }
        };

        let provider = match self.provider.as_deref() {
            None => Provider::default(),
            Some(raw) => match raw.parse::<Provider>() {
                Ok(provider) => provider,
                Err(message) => {
                    errors.push(FieldError::new("provider", message));
                    Provider::default()
                }
            },
        };

        let endpoint = match self.endpoint.map(|e| e.trim().trim_end_matches('/').to_string()) {
            Some(endpoint) if endpoint.is_empty() => None,
            Some(endpoint) if !is_valid_http_url(&endpoint) => {
                errors.push(FieldError::new(
                    "endpoint",
                    "must start with http:// or https://",
                ));
                None
            }
            other => other,
        };

        let region = self
            .region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let timeout = match self.timeout_secs {
            None => None,
            Some(secs) if secs > 0 => Some(Duration::from_secs(secs.unsigned_abs())),
            Some(secs) => {
                errors.push(FieldError::new(
                    "timeout_secs",
                    format!("must be a positive number of seconds, got {}", secs),
                ));
                None
            }
        };

        match (bucket_name, credentials) {
            (Some(bucket_name), Some(credentials)) if errors.is_empty() => Ok(Config {
                directory,
                bucket_name,
                credentials,
                concurrency,
                skip_if_exists: self.skip_if_exists.unwrap_or(true),
                provider,
                endpoint,
                region,
                timeout,
            }),
            _ => Err(ConfigError::ValidationError(errors)),
        }
    }
}

/// Validated configuration for one upload run
#[derive(Debug, Clone)]
pub struct Config {
    pub directory: PathBuf,
    pub bucket_name: String,
    pub credentials: Credentials,
    pub concurrency: usize,
    pub skip_if_exists: bool,
    pub provider: Provider,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Per-request storage timeout; `None` keeps the client default
    pub timeout: Option<Duration>,
}
