//! HTTP client module for pushing log batches to the ingestion API.
//!
//! Each push is signed, sent once with a bounded timeout and classified by
//! status code. There is no retry here: a failed push is reported to the
//! caller, which decides what to do with the batch.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info};

use crate::batch::{BatchEnvelope, BatchFormatter};
use crate::config::Config;
use crate::entry::{Context, LogLevel};
use crate::signer::{Identity, RequestSigner, SigningError, CONTENT_TYPE_JSON};

/// Version segment of the ingestion API path.
pub const API_VERSION: &str = "20200831";

/// Value of the `user-agent` header.
pub const USER_AGENT_VALUE: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Message sent by [`LogClient::test_connection`].
const CONNECTION_TEST_MESSAGE: &str = "Connection test from oci-log-shipper";

/// Errors that can occur during HTTP client operations.
///
/// A non-200 response is not an error; see [`HttpOutcome`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Failed to sign request: {0}")]
    Signing(#[from] SigningError),

    #[error("Failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOutcome {
    pub status: StatusCode,
    pub body: String,
}

impl HttpOutcome {
    /// Only `200 OK` counts as delivered.
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Anything able to deliver an envelope.
///
/// The shipper only talks to this trait, so tests can substitute the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, envelope: &BatchEnvelope) -> Result<HttpOutcome, ClientError>;
}

/// HTTP client for the OCI Logging ingestion API.
///
/// # Example
///
/// ```no_run
/// use oci_log_shipper::batch::BatchFormatter;
/// use oci_log_shipper::client::LogClient;
/// use oci_log_shipper::config::Config;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::from_env().expect("Failed to load config");
///     let client = LogClient::new(&config).expect("Failed to create client");
///
///     let formatter = BatchFormatter::from_config(&config);
///     let envelope = formatter.wrap(Vec::new());
///     let body = serde_json::to_vec(&envelope).unwrap();
///
///     match client.send(client.push_path(), body).await {
///         Ok(outcome) => println!("Status {}", outcome.status),
///         Err(e) => eprintln!("Failed to send: {}", e),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct LogClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Base URL of the ingestion API
    endpoint: String,

    /// `host[:port]` of the endpoint, as signed
    host: String,

    /// Path component of the endpoint without trailing slash, prefixed to
    /// every request target
    base_path: String,

    /// Path of the push action for the configured log
    push_path: String,

    signer: RequestSigner,

    /// Headers sent with every request before the signed ones are merged in
    fixed_headers: HeaderMap,

    /// Used by `test_connection`
    formatter: BatchFormatter,

    /// Request timeout duration
    timeout: Duration,
}

impl LogClient {
    /// Create a new log client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Signing` if the private key cannot be loaded and
    /// `ClientError::Config` if the endpoint or HTTP client is unusable.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            &config.endpoint,
            &config.log_id,
            &config.identity,
            config.request_timeout,
            BatchFormatter::from_config(config),
        )
    }

    /// Create a new log client with custom settings.
    pub fn with_settings(
        endpoint: &str,
        log_id: &str,
        identity: &Identity,
        timeout: Duration,
        formatter: BatchFormatter,
    ) -> Result<Self, ClientError> {
        let signer = RequestSigner::new(identity)?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let url = Url::parse(&endpoint).map_err(|e| ClientError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let host = authority(&url)
            .ok_or_else(|| ClientError::Config(format!("endpoint '{}' has no host", endpoint)))?;
        let base_path = url.path().trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let mut fixed_headers = HeaderMap::new();
        fixed_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        fixed_headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        fixed_headers.insert(ACCEPT, HeaderValue::from_static(CONTENT_TYPE_JSON));

        Ok(Self {
            client,
            endpoint,
            host,
            base_path,
            push_path: format!("/{}/logs/{}/actions/push", API_VERSION, log_id),
            signer,
            fixed_headers,
            formatter,
            timeout,
        })
    }

    /// POST `body` to `path` below the endpoint, signed.
    ///
    /// The signed request target is the full path of the request line,
    /// including any base path of the endpoint. Returns the status and body
    /// for any HTTP response, including error statuses. Only transport
    /// failures and signing failures are errors.
    pub async fn send(&self, path: &str, body: Vec<u8>) -> Result<HttpOutcome, ClientError> {
        let url = format!("{}{}", self.endpoint, path);
        let target = format!("{}{}", self.base_path, path);
        let signed = self.signer.sign(&Method::POST, &self.host, &target, &body)?;

        let mut headers = self.fixed_headers.clone();
        headers.extend(signed);

        debug!(url = %url, bytes = body.len(), "Sending signed request");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        Ok(HttpOutcome { status, body })
    }

    /// Send a single `info` entry to check credentials and connectivity.
    pub async fn test_connection(&self) -> bool {
        let entry = self
            .formatter
            .format_entry(LogLevel::Info, CONNECTION_TEST_MESSAGE, &Context::new());
        let envelope = self.formatter.wrap(vec![entry]);

        match self.push(&envelope).await {
            Ok(outcome) if outcome.is_success() => {
                info!("Connection test succeeded");
                true
            }
            Ok(outcome) => {
                info!(status = %outcome.status, response = %outcome.body, "Connection test rejected");
                false
            }
            Err(e) => {
                info!(error = %e, "Connection test failed");
                false
            }
        }
    }

    /// Get the configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Path of the push action for the configured log.
    pub fn push_path(&self) -> &str {
        &self.push_path
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }
}

#[async_trait]
impl Transport for LogClient {
    async fn push(&self, envelope: &BatchEnvelope) -> Result<HttpOutcome, ClientError> {
        let body = serde_json::to_vec(envelope)?;
        self.send(&self.push_path, body).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn push(&self, envelope: &BatchEnvelope) -> Result<HttpOutcome, ClientError> {
        (**self).push(envelope).await
    }
}

/// `host[:port]` the way it appears in the `Host` header.
fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
