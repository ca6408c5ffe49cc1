//! Core types and shared functionality for tabsync.
//!
//! This crate provides:
//! - The in-memory conditional cache keyed by document + tab
//! - Delimited text decoding into table payloads
//! - Unified error types and the retrieval failure taxonomy
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod tabular;

pub use cache::{CacheEntry, CacheStats, CacheStore, TabKey};
pub use config::{AppConfig, ConfigError};
pub use error::{Error, FetchError};
pub use tabular::{TablePayload, TabularError};
