//! Retrieval counters.
//!
//! Counters updated by `SyncClient` and read by status displays. Totals are
//! atomics; the per-source breakdown sits behind a short mutex.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tabsync_core::TabKey;

/// Counters for one `SyncClient`.
#[derive(Debug)]
pub struct SyncMetrics {
    origin_requests: AtomicU64,
    fresh: AtomicU64,
    not_modified: AtomicU64,
    pending: AtomicU64,
    stale_fallbacks: AtomicU64,
    failures: AtomicU64,
    window: Mutex<Window>,
}

/// State that is replaced as a whole on `reset`.
#[derive(Debug)]
struct Window {
    started_at: DateTime<Utc>,
    per_source: BTreeMap<String, u64>,
}

impl Window {
    fn new() -> Self {
        Self { started_at: Utc::now(), per_source: BTreeMap::new() }
    }
}

/// Point-in-time copy of `SyncMetrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub origin_requests: u64,
    /// Payloads decoded from a new body.
    pub fresh: u64,
    /// Not-modified answers served from cache.
    pub not_modified: u64,
    pub pending: u64,
    /// Transient failures masked by a cached payload.
    pub stale_fallbacks: u64,
    pub failures: u64,
    /// Share of answered retrievals served from cache, in percent.
    pub cache_hit_rate_percent: f64,
    /// Origin requests per `document:tab`.
    pub per_source: BTreeMap<String, u64>,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self {
            origin_requests: AtomicU64::new(0),
            fresh: AtomicU64::new(0),
            not_modified: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            stale_fallbacks: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            window: Mutex::new(Window::new()),
        }
    }
}

impl SyncMetrics {
    fn window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_request(&self, key: &TabKey) {
        self.origin_requests.fetch_add(1, Ordering::Relaxed);
        *self.window().per_source.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn record_fresh(&self) {
        self.fresh.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_modified(&self) {
        self.not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pending(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_fallback(&self) {
        self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter and restart the uptime clock.
    pub fn reset(&self) {
        for counter in
            [&self.origin_requests, &self.fresh, &self.not_modified, &self.pending, &self.stale_fallbacks, &self.failures]
        {
            counter.store(0, Ordering::Relaxed);
        }
        *self.window() = Window::new();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let fresh = self.fresh.load(Ordering::Relaxed);
        let not_modified = self.not_modified.load(Ordering::Relaxed);
        let stale_fallbacks = self.stale_fallbacks.load(Ordering::Relaxed);
        let served = fresh + not_modified + stale_fallbacks;
        let from_cache = not_modified + stale_fallbacks;
        let rate = from_cache as f64 / served.max(1) as f64 * 100.0;
        let (started_at, per_source) = {
            let window = self.window();
            (window.started_at, window.per_source.clone())
        };

        MetricsSnapshot {
            uptime_seconds: (Utc::now() - started_at).num_seconds(),
            started_at,
            origin_requests: self.origin_requests.load(Ordering::Relaxed),
            fresh,
            not_modified,
            pending: self.pending.load(Ordering::Relaxed),
            stale_fallbacks,
            failures: self.failures.load(Ordering::Relaxed),
            cache_hit_rate_percent: (rate * 10.0).round() / 10.0,
            per_source,
        }
    }
}
