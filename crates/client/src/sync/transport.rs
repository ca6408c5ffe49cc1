//! HTTP transport for tab exports.
//!
//! ### Request
//! - GET on the templated origin URL
//! - `Accept: text/csv`, configured User-Agent
//! - `If-None-Match` when a validator from a previous response is known
//!
//! ### Response
//! - Status and `ETag` are always reported
//! - The body is only read for success statuses other than 202; a body that
//!   fails mid-read is reported as unreadable rather than as a transport error
//!
//! The client timeout bounds each request, so a hung origin surfaces as
//! `TransportError::Timeout` instead of holding a refresh forever.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use std::time::{Duration, Instant};
use tabsync_core::{AppConfig, TabKey};

use super::url::origin_url;

/// Media type announced to the origin.
pub const ACCEPT_DELIMITED: &str = "text/csv";

/// Errors raised before a response status was received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid origin URL: {0}")]
    InvalidUrl(String),
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// URL template containing `{document}` and `{tab}`
    pub origin_url: String,

    /// User agent string (default: "tabsync/0.1")
    pub user_agent: String,

    /// Request timeout (default: 20s)
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for TransportConfig {
    fn from(config: &AppConfig) -> Self {
        Self { origin_url: config.origin_url.clone(), user_agent: config.user_agent.clone(), timeout: config.timeout() }
    }
}

/// One retrieval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabRequest {
    pub key: TabKey,
    /// Validator to send as `If-None-Match`.
    pub validator: Option<String>,
}

/// What the origin answered.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    /// `ETag` response header.
    pub validator: Option<String>,
    /// Body bytes, or why they could not be read. Empty when not read.
    pub body: Result<Bytes, String>,
    /// Time taken in milliseconds.
    pub fetch_ms: u64,
}

impl OriginResponse {
    /// Response with a readable body, mostly for scripted transports.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self { status, validator: None, body: Ok(body.into()), fetch_ms: 0 }
    }

    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validator = Some(validator.into());
        self
    }
}

/// Performs one request against the origin.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TabRequest) -> Result<OriginResponse, TransportError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    http: Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Create a new transport with the given configuration.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.config.timeout.as_millis() as u64)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TabRequest) -> Result<OriginResponse, TransportError> {
        let start = Instant::now();
        let url = origin_url(&self.config.origin_url, &request.key)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let mut builder = self.http.get(url.as_str()).header(header::ACCEPT, ACCEPT_DELIMITED);
        if let Some(validator) = &request.validator {
            builder = builder.header(header::IF_NONE_MATCH, validator);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let validator = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = if status.is_success() && status != StatusCode::ACCEPTED {
            response.bytes().await.map_err(|e| format!("failed to read response: {}", e))
        } else {
            Ok(Bytes::new())
        };

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            "fetched {} -> {} in {}ms ({} bytes)",
            url,
            status.as_u16(),
            fetch_ms,
            body.as_ref().map(Bytes::len).unwrap_or(0)
        );

        Ok(OriginResponse { status, validator, body, fetch_ms })
    }
}
