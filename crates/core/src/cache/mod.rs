//! In-memory conditional cache for retrieved tables.
//!
//! Keyed by document + tab. Each entry holds the last good payload and the
//! origin's validator, which turns the next retrieval into a conditional one.

pub mod key;
pub mod store;

pub use key::TabKey;
pub use store::{CacheEntry, CacheStats, CacheStore};
