//! Generation-partitioned response cache for the request router.
//!
//! This module provides:
//! - Request identity normalization (method + URL) as the cache key
//! - Cache-first fetching that stores successful `GET` responses
//! - Generation install/activate, where activation drops every other generation
//! - Offline serving: entries are returned verbatim with no expiry check

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, RequestKey};

#[cfg(test)]
pub use traits::CacheSource;
