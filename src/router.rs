//! Per-request strategy selection: mock API, navigation or cache-first.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::backend::SimulatedBackend;
use crate::cache::{CacheLayer, CacheResult, RequestKey, SqliteStorage};
use crate::error::{FetchError, RouteError};
use crate::net::{Fetcher, Request, RequestMode, Response};

/// How a request will be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Answered by the simulated backend; never network or cache
  MockApi,
  /// Network first, offline document on failure
  Navigation,
  /// Stored response first, network on miss
  CacheFirst,
}

/// Static routing table.
#[derive(Debug, Clone)]
pub struct Routes {
  /// Path whose POSTs go to the simulated backend
  pub mock_path: String,
  /// Offline document served for failed navigations
  pub fallback: Url,
  /// Fetched into a generation on install
  pub precache: Vec<Url>,
  /// Generation the configured version maps to
  pub generation: String,
}

/// Generation bookkeeping reported by `cache status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
  pub configured: String,
  pub serving: String,
  pub generations: Vec<(String, usize)>,
}

pub struct Router {
  cache: CacheLayer<SqliteStorage>,
  fetcher: Arc<dyn Fetcher>,
  backend: Arc<dyn SimulatedBackend>,
  routes: Routes,
}

impl Router {
  pub fn new(
    cache: CacheLayer<SqliteStorage>,
    fetcher: Arc<dyn Fetcher>,
    backend: Arc<dyn SimulatedBackend>,
    routes: Routes,
  ) -> Self {
    Self {
      cache,
      fetcher,
      backend,
      routes,
    }
  }

  /// Exactly one strategy per request, checked in priority order.
  pub fn classify(&self, request: &Request) -> Strategy {
    if request.method == Method::POST && request.url.path() == self.routes.mock_path {
      Strategy::MockApi
    } else if request.mode == RequestMode::Navigate {
      Strategy::Navigation
    } else {
      Strategy::CacheFirst
    }
  }

  /// Produce a response for `request`. Never fails: the worst case is a
  /// synthetic offline response.
  pub async fn handle(&self, request: Request) -> CacheResult<Response> {
    let strategy = self.classify(&request);
    debug!(method = %request.method, url = %request.url, ?strategy, "Routing request");

    match strategy {
      Strategy::MockApi => {
        let body = request.body.as_deref().unwrap_or_default();
        CacheResult::from_backend(self.backend.handle(body))
      }
      Strategy::Navigation => self.navigate(&request).await,
      Strategy::CacheFirst => self.cache_first(&request).await,
    }
  }

  async fn navigate(&self, request: &Request) -> CacheResult<Response> {
    let error = match self.fetcher.fetch(request).await {
      Ok(response) => return CacheResult::from_network(response),
      Err(e) => e,
    };
    warn!(url = %request.url, error = %error, "Navigation failed, serving offline document");

    match self.offline_document() {
      Ok(result) => result,
      Err(e) => {
        warn!(error = %e, "No offline document available");
        CacheResult::synthetic(Response::text(503, "Offline"))
      }
    }
  }

  fn offline_document(&self) -> Result<CacheResult<Response>> {
    let key = RequestKey::get(&self.routes.fallback);
    match self.cache.lookup(&key)? {
      Some(entry) => Ok(CacheResult::fallback(entry.response, entry.cached_at)),
      None => Err(RouteError::FallbackMissing(self.routes.fallback.to_string()).into()),
    }
  }

  async fn cache_first(&self, request: &Request) -> CacheResult<Response> {
    let key = RequestKey::new(&request.method, &request.url);

    match self
      .cache
      .fetch_cache_first(&key, || self.fetcher.fetch(request))
      .await
    {
      Ok(result) => result,
      Err(e) => {
        warn!(key = %key.description(), error = %e, "Asset unavailable offline");
        CacheResult::synthetic(Response::text(504, "Offline asset not in cache"))
      }
    }
  }

  pub fn configured_generation(&self) -> &str {
    &self.routes.generation
  }

  /// Fetch the precache list into the configured generation.
  pub async fn install(&self) -> Result<usize> {
    let keys: Vec<RequestKey> = self.routes.precache.iter().map(RequestKey::get).collect();
    let fetcher = Arc::clone(&self.fetcher);

    self
      .cache
      .install(&self.routes.generation, &keys, move |key| {
        let fetcher = Arc::clone(&fetcher);
        async move {
          let url = Url::parse(key.url()).map_err(|e| FetchError::Transport(e.to_string()))?;
          fetcher.fetch(&Request::get(url)).await
        }
      })
      .await
  }

  /// Serve from the configured generation and drop every other one.
  pub fn activate(&self) -> Result<usize> {
    if !self.cache.is_installed(&self.routes.generation)? {
      return Err(eyre!(
        "Generation {} is not installed; run `postlane cache install` first",
        self.routes.generation
      ));
    }
    self.cache.activate(&self.routes.generation)
  }

  /// Install then activate, as done on agent start-up.
  pub async fn prepare(&self) -> Result<()> {
    if self.cache.serving_generation()? == self.routes.generation
      && self.cache.is_installed(&self.routes.generation)?
    {
      debug!(generation = %self.routes.generation, "Cache generation already active");
      return Ok(());
    }
    self.install().await?;
    self.activate()?;
    Ok(())
  }

  /// Drop every generation, forcing the next start to reinstall.
  pub fn purge(&self) -> Result<usize> {
    self.cache.purge()
  }

  pub fn status(&self) -> Result<CacheStatus> {
    Ok(CacheStatus {
      configured: self.routes.generation.clone(),
      serving: self.cache.serving_generation()?,
      generations: self.cache.generations()?,
    })
  }
}
