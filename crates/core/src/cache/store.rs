//! In-memory store of the last good payload per tab.
//!
//! Entries carry the origin's validator so the next request can be made
//! conditional. Nothing expires on its own; `clear()` is the only eviction.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::key::TabKey;
use crate::tabular::TablePayload;

/// Last successfully retrieved payload for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: TablePayload,
    /// Origin-issued version marker (ETag), if any.
    pub validator: Option<String>,
}

/// Introspection view of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub count: usize,
    /// Keys in sorted order.
    pub keys: Vec<TabKey>,
}

/// Shared handle to the cache.
///
/// Clones share the same entries, so a `SyncClient` and status displays can
/// hold their own handle.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    entries: Arc<RwLock<HashMap<TabKey, CacheEntry>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for `key`.
    pub async fn get(&self, key: &TabKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Replace the entry for `key` wholesale.
    pub async fn put(&self, key: TabKey, payload: TablePayload, validator: Option<String>) {
        tracing::debug!(key = %key, rows = payload.row_count(), "cache put");
        self.entries.write().await.insert(key, CacheEntry { payload, validator });
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        tracing::debug!(count = entries.len(), "cache cleared");
        entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let mut keys: Vec<TabKey> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats { count: keys.len(), keys }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
