//! Error types shared by the queue, delivery and routing layers.

use thiserror::Error;

/// Durable storage could not be opened or a transaction failed.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    StoreError::Unavailable(e.to_string())
  }
}

/// Failure to hand a message to the remote delivery endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
  /// The endpoint could not be reached at all (DNS, refused, timeout).
  #[error("network unreachable: {0}")]
  NetworkUnreachable(String),

  /// The endpoint answered with a non-2xx status.
  #[error("HTTP {status}")]
  RemoteRejected { status: u16, body: String },
}

impl DeliveryError {
  /// Whether this failure means the whole channel is down rather than one item.
  pub fn is_network(&self) -> bool {
    matches!(self, DeliveryError::NetworkUnreachable(_))
  }
}

/// Transport failure while fetching a routed request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("fetch failed: {0}")]
  Transport(String),
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    FetchError::Transport(e.to_string())
  }
}

/// Failures internal to the request router.
#[derive(Debug, Error)]
pub enum RouteError {
  /// The pre-cached offline document is not in the active generation.
  #[error("fallback document {0} is not cached")]
  FallbackMissing(String),
}
