//! Connectivity and visibility signals that turn into sync triggers.

use reqwest::Method;
use std::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::coordinator::{SyncCoordinator, SyncTrigger};
use crate::net::{Fetcher, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
  Online,
  Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  Visible,
  Hidden,
}

/// Probe reachability with a HEAD request. Any HTTP answer counts as online.
pub async fn probe(fetcher: &dyn Fetcher, url: &Url) -> NetworkState {
  let request = Request {
    method: Method::HEAD,
    ..Request::get(url.clone())
  };
  match fetcher.fetch(&request).await {
    Ok(response) => {
      debug!(url = %url, status = response.status, "Probe answered");
      NetworkState::Online
    }
    Err(e) => {
      debug!(url = %url, error = %e, "Probe failed");
      NetworkState::Offline
    }
  }
}

/// Tracks the last observed network state and visibility and fires the
/// matching triggers on the coordinator.
pub struct SignalMonitor {
  coordinator: SyncCoordinator,
  network: Mutex<Option<NetworkState>>,
  visibility: Mutex<Visibility>,
}

impl SignalMonitor {
  pub fn new(coordinator: SyncCoordinator) -> Self {
    Self {
      coordinator,
      network: Mutex::new(None),
      visibility: Mutex::new(Visibility::Visible),
    }
  }

  pub fn network(&self) -> Option<NetworkState> {
    *self.network.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn visibility(&self) -> Visibility {
    *self.visibility.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Record an observation. Online fires `ConnectivityRestored` after an
  /// offline observation, or while a background sync is registered.
  pub fn observe(&self, state: NetworkState) -> Option<SyncTrigger> {
    let previous = self
      .network
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .replace(state);

    if previous != Some(state) {
      info!(?previous, current = ?state, "Connectivity changed");
    }
    if state == NetworkState::Offline {
      return None;
    }

    let restored = previous == Some(NetworkState::Offline);
    let armed = self.coordinator.take_armed();
    if !(restored || armed) {
      return None;
    }

    self.coordinator.trigger(SyncTrigger::ConnectivityRestored);
    Some(SyncTrigger::ConnectivityRestored)
  }

  /// Record a visibility change. Coming to the foreground fires
  /// `VisibilityForeground`.
  pub fn set_visibility(&self, visibility: Visibility) -> Option<SyncTrigger> {
    let previous = std::mem::replace(
      &mut *self.visibility.lock().unwrap_or_else(|e| e.into_inner()),
      visibility,
    );

    if previous == Visibility::Hidden && visibility == Visibility::Visible {
      self.coordinator.trigger(SyncTrigger::VisibilityForeground);
      return Some(SyncTrigger::VisibilityForeground);
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Response;
  use crate::notify::Notifier;
  use crate::testing::{memory_store, ScriptedFetcher, ScriptedRemote};
  use crate::worker::DeliveryWorker;
  use std::sync::Arc;

  fn monitor() -> (SignalMonitor, SyncCoordinator) {
    let worker = DeliveryWorker::new(
      memory_store(),
      Arc::new(ScriptedRemote::new()),
      Notifier::default(),
    );
    let coordinator = SyncCoordinator::new(worker);
    (SignalMonitor::new(coordinator.clone()), coordinator)
  }

  #[tokio::test]
  async fn test_offline_to_online_fires() {
    let (monitor, coordinator) = monitor();

    assert_eq!(monitor.observe(NetworkState::Online), None);
    assert_eq!(monitor.observe(NetworkState::Offline), None);
    assert_eq!(
      monitor.observe(NetworkState::Online),
      Some(SyncTrigger::ConnectivityRestored)
    );
    assert_eq!(monitor.observe(NetworkState::Online), None);

    coordinator.wait_idle().await;
  }

  #[tokio::test]
  async fn test_armed_fires_on_next_online_observation() {
    let (monitor, coordinator) = monitor();
    monitor.observe(NetworkState::Online);

    coordinator.arm();
    assert_eq!(monitor.observe(NetworkState::Offline), None);
    assert!(coordinator.is_armed());

    assert_eq!(
      monitor.observe(NetworkState::Online),
      Some(SyncTrigger::ConnectivityRestored)
    );
    assert!(!coordinator.is_armed());

    coordinator.arm();
    assert_eq!(
      monitor.observe(NetworkState::Online),
      Some(SyncTrigger::ConnectivityRestored)
    );
    coordinator.wait_idle().await;
  }

  #[tokio::test]
  async fn test_foreground_fires_only_from_hidden() {
    let (monitor, coordinator) = monitor();

    assert_eq!(monitor.set_visibility(Visibility::Visible), None);
    assert_eq!(monitor.set_visibility(Visibility::Hidden), None);
    assert_eq!(
      monitor.set_visibility(Visibility::Visible),
      Some(SyncTrigger::VisibilityForeground)
    );
    assert_eq!(monitor.visibility(), Visibility::Visible);

    coordinator.wait_idle().await;
  }

  #[tokio::test]
  async fn test_probe_maps_transport_failure_to_offline() {
    let url = Url::parse("http://localhost/health").unwrap();
    let fetcher = ScriptedFetcher::new().route(url.as_str(), Response::text(404, "nope"));

    // Any HTTP answer, even an error status, means the network is up
    assert_eq!(probe(&fetcher, &url).await, NetworkState::Online);

    fetcher.set_offline(true);
    assert_eq!(probe(&fetcher, &url).await, NetworkState::Offline);
  }
}
