//! Google Cloud Storage client
//!
//! Uploads through the GCS JSON API (`uploadType=media`), streaming the file
//! body from disk. Every request is bounded by the settings' timeout. Access
//! tokens are minted from a service account key with the OAuth2 JWT bearer
//! grant and cached until shortly before they expire.
//!
//! # Example
//!
//! ```no_run
//! use bundle_uploadr::config::Credentials;
//! use bundle_uploadr::storage::{GcsClient, ObjectUploadOptions, StorageClient, StorageSettings};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = std::fs::read_to_string("service-account.json")?;
//! let credentials = Credentials::from_value(serde_json::Value::String(key))?;
//! let client = GcsClient::from_credentials(&credentials, &StorageSettings::default())?;
//!
//! let options = ObjectUploadOptions {
//!     destination: "/index.html".to_string(),
//!     if_absent: true,
//!     content_type: Some("text/html".to_string()),
//! };
//! client.bucket("my-bucket").upload(Path::new("dist/index.html"), &options).await?;
//! # Ok(())
//! # }
//! ```

use super::{
    Bucket, ObjectMetadata, ObjectUploadOptions, RetryPolicy, StorageClient, StorageError,
    StorageSettings,
};
use crate::config::Credentials;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Public GCS API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Google OAuth2 token endpoint, used when the key does not name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

// Bucket names only contain [a-z0-9-_.]; keep those readable in the path.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The parts of a service account key file this client needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Read a service account key out of parsed credentials
    pub fn from_credentials(credentials: &Credentials) -> Result<Self, StorageError> {
        serde_json::from_value(credentials.to_value()).map_err(|e| {
            StorageError::InvalidCredentials(format!("not a service account key: {}", e))
        })
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

/// Object resource returned by a successful upload
#[derive(Debug, Default, Deserialize)]
struct GcsObject {
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    generation: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

struct GcsInner {
    http: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    endpoint: String,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

/// Google Cloud Storage client
///
/// Cheap to clone; clones share the HTTP connection pool and token cache.
#[derive(Clone)]
pub struct GcsClient {
    inner: Arc<GcsInner>,
}

impl GcsClient {
    /// Build a client from a service account key.
    ///
    /// Fails if the credentials lack `client_email`/`private_key` or the key
    /// is not an RSA PEM. No network traffic happens until the first upload.
    pub fn from_credentials(
        credentials: &Credentials,
        settings: &StorageSettings,
    ) -> Result<Self, StorageError> {
        let key = ServiceAccountKey::from_credentials(credentials)?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            StorageError::InvalidCredentials(format!("private_key is not a valid RSA key: {}", e))
        })?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("bundle-uploadr/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let endpoint = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        tracing::debug!(
            client_email = %key.client_email,
            endpoint = %endpoint,
            timeout = ?settings.request_timeout(),
            "Created GCS client"
        );

        Ok(Self {
            inner: Arc::new(GcsInner {
                http,
                key,
                signing_key,
                endpoint,
                retry: settings.retry,
                token: Mutex::new(None),
            }),
        })
    }

    /// API endpoint uploads are sent to
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Service account the client authenticates as
    pub fn client_email(&self) -> &str {
        &self.inner.key.client_email
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.inner.endpoint,
            utf8_percent_encode(bucket, PATH_SEGMENT)
        )
    }

    /// Current access token, fetching a new one when the cached token is
    /// missing or about to expire.
    async fn access_token(&self) -> Result<String, StorageError> {
        let mut cached = self.inner.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken, StorageError> {
        let key = &self.inner.key;
        let now = Utc::now();
        let claims = Claims {
            iss: &key.client_email,
            scope: STORAGE_SCOPE,
            aud: &key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();

        let assertion = jsonwebtoken::encode(&header, &claims, &self.inner.signing_key)
            .map_err(|e| StorageError::AuthError(format!("failed to sign assertion: {}", e)))?;

        let response = self
            .inner
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| StorageError::RequestError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::AuthError(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StorageError::AuthError(format!("invalid token response: {}", e)))?;

        tracing::debug!(expires_in = token.expires_in, "Fetched GCS access token");

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        })
    }
}

impl StorageClient for GcsClient {
    fn bucket(&self, name: &str) -> Arc<dyn Bucket> {
        Arc::new(GcsBucket {
            client: self.clone(),
            name: name.to_string(),
        })
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Bucket handle returned by [`GcsClient::bucket`]
pub struct GcsBucket {
    client: GcsClient,
    name: String,
}

#[async_trait]
impl Bucket for GcsBucket {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(
        name = "gcs.upload",
        skip(self, options),
        fields(
            gcs.bucket = %self.name,
            gcs.object = %options.destination,
            upload.bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload(
        &self,
        local_path: &Path,
        options: &ObjectUploadOptions,
    ) -> Result<ObjectMetadata, StorageError> {
        let bytes_written = tokio::fs::metadata(local_path).await?.len();

        let span = tracing::Span::current();
        span.record("upload.bytes", bytes_written);

        let url = self.client.upload_url(&self.name);
        let mut query = vec![
            ("uploadType", "media"),
            ("name", options.destination.as_str()),
        ];
        if options.if_absent {
            query.push(("ifGenerationMatch", "0"));
        }

        let retry = self.client.inner.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let token = self.client.access_token().await?;
            // Reopened per attempt so a retry streams from the start
            let file = tokio::fs::File::open(local_path).await?;

            let mut request = self
                .client
                .inner
                .http
                .post(&url)
                .query(&query)
                .bearer_auth(&token)
                .header(reqwest::header::CONTENT_LENGTH, bytes_written)
                .body(reqwest::Body::from(file));
            if let Some(content_type) = &options.content_type {
                request = request.header(reqwest::header::CONTENT_TYPE, content_type);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if attempt < retry.max_attempts && (e.is_timeout() || e.is_connect()) => {
                    tracing::warn!(attempt, error = %e, "GCS upload request failed, retrying");
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                    continue;
                }
                Err(e) => return Err(StorageError::RequestError(e.to_string())),
            };

            let status = response.status();
            span.record("http.status_code", status.as_u16());

            if status.is_success() {
                let raw = response
                    .bytes()
                    .await
                    .map_err(|e| StorageError::RequestError(e.to_string()))?;
                let object: GcsObject = serde_json::from_slice(&raw).unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "Upload response is not an object resource");
                    GcsObject::default()
                });

                return Ok(ObjectMetadata {
                    etag: object.etag,
                    generation: object.generation,
                    bytes_written,
                });
            }

            if status == StatusCode::PRECONDITION_FAILED {
                return Err(StorageError::PreconditionFailed(options.destination.clone()));
            }

            let message = response.text().await.unwrap_or_default();

            if is_retryable(status) && attempt < retry.max_attempts {
                tracing::warn!(
                    attempt,
                    status = status.as_u16(),
                    "GCS upload failed with a transient error, retrying"
                );
                tokio::time::sleep(retry.delay_for(attempt)).await;
                continue;
            }

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    StorageError::AuthError(format!("{}: {}", status, message))
                }
                _ => StorageError::ResponseError {
                    status: status.as_u16(),
                    message,
                },
            });
        }
    }
}
