//! Conditional retrieval of remote tabs with stale-cache fallback.
//!
//! ### Conditional Requests
//! - A cached validator is sent as `If-None-Match`
//! - 304 answers are served from the cache without a body transfer
//!
//! ### Failure Classification
//! | origin answer          | cached entry  | outcome                |
//! |------------------------|---------------|------------------------|
//! | 304                    | yes / no      | cached / `ParseError`  |
//! | 202                    | any           | `Pending`, cache kept  |
//! | 404 / 403              | any           | `NotFound` / `NotPublished` |
//! | 429 / 5xx              | yes / no      | stale / `ServerError`  |
//! | other non-success      | any           | `Network`              |
//! | transport failure      | yes / no      | stale / `Network`      |
//! | 2xx with bad body      | any           | `ParseError`           |
//!
//! ### Cache Writes
//! Only a fresh 2xx that carries a validator is written back.

pub mod metrics;
pub mod transport;
pub mod url;

pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use transport::{HttpTransport, OriginResponse, TabRequest, Transport, TransportConfig, TransportError};
pub use url::{UrlError, origin_url};

use reqwest::StatusCode;
use std::sync::Arc;
use tabsync_core::{AppConfig, CacheEntry, CacheStore, FetchError, TabKey, TablePayload};
use tokio::task::JoinSet;

/// A retrieval that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Current (or last known good) table.
    Ready(TablePayload),
    /// The origin accepted the request but has no data yet; retry later.
    Pending,
}

impl Fetched {
    pub fn payload(&self) -> Option<&TablePayload> {
        match self {
            Fetched::Ready(payload) => Some(payload),
            Fetched::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Fetched::Pending)
    }
}

/// Result of one retrieval attempt.
pub type FetchOutcome = Result<Fetched, FetchError>;

/// Retrieves tabs through a `Transport`, keeping a `CacheStore` current.
#[derive(Clone)]
pub struct SyncClient {
    transport: Arc<dyn Transport>,
    cache: CacheStore,
    metrics: Arc<SyncMetrics>,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn Transport>, cache: CacheStore) -> Self {
        Self { transport, cache, metrics: Arc::new(SyncMetrics::default()) }
    }

    /// Client backed by `HttpTransport` built from the application config.
    pub fn from_config(config: &AppConfig, cache: CacheStore) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(TransportConfig::from(config))?;
        Ok(Self::new(Arc::new(transport), cache))
    }

    /// Handle to the cache this client writes to.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Start counting from zero, e.g. after a dashboard is cleared.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Retrieve one tab.
    pub async fn retrieve(&self, document_id: &str, tab_id: &str) -> FetchOutcome {
        self.retrieve_key(&TabKey::new(document_id, tab_id)).await
    }

    /// Retrieve one tab by key.
    pub async fn retrieve_key(&self, key: &TabKey) -> FetchOutcome {
        let outcome = self.fetch(key).await;
        match &outcome {
            Ok(Fetched::Pending) => self.metrics.record_pending(),
            Ok(Fetched::Ready(_)) => {}
            Err(err) => {
                self.metrics.record_failure();
                tracing::debug!(key = %key, code = err.code(), "retrieval failed: {}", err);
            }
        }
        outcome
    }

    /// Retrieve every key concurrently; fails as a whole if any item failed.
    ///
    /// All retrievals run to completion (and land their cache writes) before
    /// the first failure in input order is returned.
    pub async fn retrieve_many(&self, keys: &[TabKey]) -> Result<Vec<Fetched>, FetchError> {
        self.retrieve_each(keys).await.into_iter().collect()
    }

    /// Retrieve every key concurrently, keeping each item's outcome.
    pub async fn retrieve_each(&self, keys: &[TabKey]) -> Vec<FetchOutcome> {
        let mut join_set = JoinSet::new();

        for (index, key) in keys.iter().cloned().enumerate() {
            let client = self.clone();
            join_set.spawn(async move { (index, client.retrieve_key(&key).await) });
        }

        let mut outcomes: Vec<FetchOutcome> =
            keys.iter().map(|key| Err(FetchError::Network(format!("{key}: retrieval task did not finish")))).collect();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(err) => tracing::error!(error = %err, "retrieval task failed"),
            }
        }

        outcomes
    }

    async fn fetch(&self, key: &TabKey) -> FetchOutcome {
        let cached = self.cache.get(key).await;
        let request = TabRequest { key: key.clone(), validator: cached.as_ref().and_then(|e| e.validator.clone()) };

        self.metrics.record_request(key);
        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(err) => {
                return self.fall_back(key, cached, FetchError::Network(format!("{key}: {err}")));
            }
        };

        let status = response.status;
        tracing::debug!(key = %key, status = status.as_u16(), conditional = request.validator.is_some(), "origin answered");

        if status == StatusCode::NOT_MODIFIED {
            return match cached {
                Some(entry) => {
                    self.metrics.record_not_modified();
                    Ok(Fetched::Ready(entry.payload))
                }
                None => Err(FetchError::ParseError(format!("{key}: not modified, but nothing is cached"))),
            };
        }
        if status == StatusCode::ACCEPTED {
            return Ok(Fetched::Pending);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(format!("{key}: document or tab not found")));
        }
        if status == StatusCode::FORBIDDEN {
            return Err(FetchError::NotPublished(format!("{key}: document is not published")));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return self.fall_back(key, cached, FetchError::ServerError(format!("{key}: rate limited")));
        }
        if status.is_server_error() {
            return self.fall_back(key, cached, FetchError::ServerError(format!("{key}: status {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("{key}: unexpected status {}", status.as_u16())));
        }

        let body = response.body.map_err(|e| FetchError::ParseError(format!("{key}: {e}")))?;
        let payload = TablePayload::from_bytes(&body).map_err(|e| FetchError::ParseError(format!("{key}: {e}")))?;
        self.metrics.record_fresh();

        match response.validator {
            Some(validator) => self.cache.put(key.clone(), payload.clone(), Some(validator)).await,
            None => tracing::debug!(key = %key, "no validator in response; cache left as-is"),
        }

        Ok(Fetched::Ready(payload))
    }

    /// Serve the cached payload for a transient failure, if there is one.
    fn fall_back(&self, key: &TabKey, cached: Option<CacheEntry>, err: FetchError) -> FetchOutcome {
        match cached {
            Some(entry) => {
                self.metrics.record_stale_fallback();
                tracing::warn!(key = %key, code = err.code(), fetched_at = %entry.payload.fetched_at, "serving stale cache: {}", err);
                Ok(Fetched::Ready(entry.payload))
            }
            None => Err(err),
        }
    }
}
