//! Cache layer that orchestrates generation lifecycle and cache-first fetching.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::{CacheStorage, CachedEntry};
use super::traits::{CacheResult, RequestKey};
use crate::error::FetchError;
use crate::net::Response;

/// Cache layer that manages generations and network fallthrough.
///
/// Entries are served verbatim with no staleness check. Freshness is
/// controlled only by rotating the generation.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// Generation served when none has been activated yet
  default_generation: String,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, default_generation: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      default_generation: default_generation.into(),
    }
  }

  /// Generation requests are currently served from.
  pub fn serving_generation(&self) -> Result<String> {
    Ok(
      self
        .storage
        .active_generation()?
        .unwrap_or_else(|| self.default_generation.clone()),
    )
  }

  /// Look up a request in the serving generation.
  pub fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let generation = self.serving_generation()?;
    self.storage.get(&generation, key)
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Serve a cached entry if present
  /// 2. Otherwise fetch from network
  /// 3. Store a copy only for successful (200) `GET` responses
  ///
  /// Cache read/write failures degrade to a miss and are only logged.
  pub async fn fetch_cache_first<F, Fut>(
    &self,
    key: &RequestKey,
    fetcher: F,
  ) -> std::result::Result<CacheResult<Response>, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Response, FetchError>>,
  {
    let generation = match self.serving_generation() {
      Ok(generation) => Some(generation),
      Err(e) => {
        warn!(error = %e, "Cache unavailable, going to network");
        None
      }
    };

    if let Some(generation) = &generation {
      match self.storage.get(generation, key) {
        Ok(Some(cached)) => {
          debug!(key = %key.description(), "Cache hit");
          return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key.description(), error = %e, "Cache read failed"),
      }
    }

    let response = fetcher().await?;

    if let Some(generation) = &generation {
      if key.is_get() && response.is_ok() {
        match self.storage.put(generation, key, &response) {
          Ok(true) => {}
          Ok(false) => {
            debug!(key = %key.description(), generation = %generation, "Generation retired, not caching")
          }
          Err(e) => warn!(key = %key.description(), error = %e, "Cache write failed"),
        }
      }
    }

    Ok(CacheResult::from_network(response))
  }

  /// Populate `generation` from the network.
  ///
  /// All-or-nothing: every request must come back 200 or nothing is stored.
  pub async fn install<F, Fut>(
    &self,
    generation: &str,
    keys: &[RequestKey],
    fetcher: F,
  ) -> Result<usize>
  where
    F: Fn(RequestKey) -> Fut,
    Fut: Future<Output = std::result::Result<Response, FetchError>>,
  {
    let mut entries = Vec::with_capacity(keys.len());

    for key in keys {
      let response = fetcher(key.clone())
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", key.description(), e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: HTTP {}",
          key.description(),
          response.status
        ));
      }
      entries.push((key.clone(), response));
    }

    self.storage.put_all(generation, &entries)?;
    info!(generation, entries = entries.len(), "Cache generation installed");
    Ok(entries.len())
  }

  /// Switch serving to `generation`, deleting every other generation.
  pub fn activate(&self, generation: &str) -> Result<usize> {
    let removed = self.storage.activate(generation)?;
    info!(generation, removed, "Cache generation activated");
    Ok(removed)
  }

  /// Drop every generation.
  pub fn purge(&self) -> Result<usize> {
    let removed = self.storage.purge()?;
    info!(removed, "Cache purged");
    Ok(removed)
  }

  /// Whether `generation` finished a complete install.
  pub fn is_installed(&self, generation: &str) -> Result<bool> {
    self.storage.is_installed(generation)
  }

  /// Generation names with entry counts.
  pub fn generations(&self) -> Result<Vec<(String, usize)>> {
    self.storage.generations()
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      default_generation: self.default_generation.clone(),
    }
  }
}
