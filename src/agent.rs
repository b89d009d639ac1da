//! The delivery agent: wires the queue, worker, coordinator, router and
//! signal monitor together and exposes the user-facing actions.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::backend::{FaultInjectingBackend, SimulatedBackend};
use crate::cache::{CacheLayer, CacheResult, SqliteStorage};
use crate::config::Config;
use crate::connectivity::{self, NetworkState, SignalMonitor, Visibility};
use crate::coordinator::{SyncCoordinator, SyncTrigger, TriggerOutcome};
use crate::db::Database;
use crate::error::{DeliveryError, StoreError};
use crate::net::{Fetcher, HttpFetcher, Request, Response};
use crate::notify::{DeliveryEvent, Notifier};
use crate::queue::{MessageId, PendingMessage, QueueStore, SqliteQueueStore};
use crate::remote::{HttpRemote, OutboundMessage, RemoteEndpoint};
use crate::router::Router;
use crate::worker::DeliveryWorker;

/// What happened to a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
  /// The endpoint confirmed the message immediately
  Delivered,
  /// Direct delivery failed; the message is queued for the next drain
  Queued { id: MessageId, reason: DeliveryError },
}

/// Collaborators the agent is assembled from.
pub struct Parts {
  /// Backs the response cache
  pub db: Arc<Database>,
  pub store: Arc<dyn QueueStore>,
  pub remote: Arc<dyn RemoteEndpoint>,
  pub fetcher: Arc<dyn Fetcher>,
  pub backend: Arc<dyn SimulatedBackend>,
  pub probe_url: Url,
}

pub struct Agent {
  store: Arc<dyn QueueStore>,
  remote: Arc<dyn RemoteEndpoint>,
  fetcher: Arc<dyn Fetcher>,
  backend: Arc<dyn SimulatedBackend>,
  notifier: Notifier,
  coordinator: SyncCoordinator,
  monitor: SignalMonitor,
  router: Router,
  probe_url: Url,
  /// Manual network state set from the console; suppresses probing
  forced_network: Mutex<Option<NetworkState>>,
}

impl Agent {
  /// Build the agent from configuration with the real HTTP stack.
  pub fn from_config(config: &Config) -> Result<Self> {
    let db = Arc::new(Database::open(&config.database_path()?)?);
    let timeout = config.timeout();

    let parts = Parts {
      store: Arc::new(SqliteQueueStore::new(db.clone())),
      db,
      remote: Arc::new(HttpRemote::new(config.endpoint()?, timeout)?),
      fetcher: Arc::new(HttpFetcher::new(timeout)?),
      backend: Arc::new(FaultInjectingBackend::new(config.mock_api.failure_rate)),
      probe_url: config.probe_url()?,
    };
    Self::new(config, parts)
  }

  pub fn new(config: &Config, parts: Parts) -> Result<Self> {
    let store = parts.store;
    let notifier = Notifier::default();
    let worker = DeliveryWorker::new(store.clone(), parts.remote.clone(), notifier.clone());
    let coordinator = SyncCoordinator::new(worker);
    let monitor = SignalMonitor::new(coordinator.clone());

    let cache = CacheLayer::new(SqliteStorage::new(parts.db), config.generation());
    let router = Router::new(
      cache,
      parts.fetcher.clone(),
      parts.backend.clone(),
      config.routes()?,
    );

    Ok(Self {
      store,
      remote: parts.remote,
      fetcher: parts.fetcher,
      backend: parts.backend,
      notifier,
      coordinator,
      monitor,
      router,
      probe_url: parts.probe_url,
      forced_network: Mutex::new(None),
    })
  }

  pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
    self.notifier.subscribe()
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  pub fn coordinator(&self) -> &SyncCoordinator {
    &self.coordinator
  }

  /// Attempt direct delivery; on any failure persist the message and
  /// register a background sync.
  ///
  /// Only a storage failure is an error: the message is then lost and the
  /// caller must be told.
  pub async fn send(&self, payload: &str) -> Result<SendOutcome, StoreError> {
    let reason = match self.remote.deliver(&OutboundMessage::direct(payload)).await {
      Ok(()) => {
        info!("Message delivered directly");
        return Ok(SendOutcome::Delivered);
      }
      Err(e) => e,
    };

    warn!(error = %reason, "Direct send failed, queueing for background sync");
    let id = self.store.enqueue(payload)?;
    self.coordinator.arm();
    info!(id = %id, "Message queued");

    Ok(SendOutcome::Queued { id, reason })
  }

  /// Queued messages in delivery order. A non-empty queue re-registers a
  /// background sync.
  pub fn pending(&self) -> Result<Vec<PendingMessage>, StoreError> {
    let messages = self.store.list_all()?;
    if !messages.is_empty() {
      self.coordinator.arm();
    }
    Ok(messages)
  }

  /// Start a drain now.
  pub fn force_sync(&self) -> TriggerOutcome {
    match self.store.is_empty() {
      Ok(false) => self.coordinator.arm(),
      Ok(true) => {}
      Err(e) => warn!(error = %e, "Could not read queue before forced sync"),
    }
    self.coordinator.trigger(SyncTrigger::ExplicitForce)
  }

  pub fn set_visibility(&self, visibility: Visibility) -> Option<SyncTrigger> {
    self.monitor.set_visibility(visibility)
  }

  /// Probe connectivity unless it was forced from the console.
  pub async fn check_connectivity(&self) -> Option<SyncTrigger> {
    let forced = *self.forced_network.lock().unwrap_or_else(|e| e.into_inner());
    let state = match forced {
      Some(state) => state,
      None => connectivity::probe(self.fetcher.as_ref(), &self.probe_url).await,
    };
    self.observe(state)
  }

  /// Pin the network state until cleared with `None`.
  pub fn force_network(&self, state: Option<NetworkState>) -> Option<SyncTrigger> {
    *self.forced_network.lock().unwrap_or_else(|e| e.into_inner()) = state;
    state.and_then(|s| self.observe(s))
  }

  fn observe(&self, state: NetworkState) -> Option<SyncTrigger> {
    self.backend.set_online(state == NetworkState::Online);
    self.monitor.observe(state)
  }

  pub fn network(&self) -> Option<NetworkState> {
    self.monitor.network()
  }

  pub fn visibility(&self) -> Visibility {
    self.monitor.visibility()
  }

  pub fn queue_len(&self) -> Result<usize, StoreError> {
    self.store.len()
  }

  pub async fn fetch(&self, request: Request) -> CacheResult<Response> {
    self.router.handle(request).await
  }

  /// Make sure the configured cache generation is installed and serving.
  /// Failure leaves the previous generation in place.
  pub async fn prepare_cache(&self) -> Result<()> {
    self
      .router
      .prepare()
      .await
      .map_err(|e| eyre!("Cache generation {} not ready: {}", self.router.configured_generation(), e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{
    memory_db, payloads, BrokenStore, Outcome, ScriptedFetcher, ScriptedRemote, StubBackend,
  };

  struct Fixture {
    agent: Agent,
    remote: Arc<ScriptedRemote>,
    fetcher: Arc<ScriptedFetcher>,
  }

  fn fixture() -> Fixture {
    let db = memory_db();
    fixture_with_store(db.clone(), Arc::new(SqliteQueueStore::new(db)))
  }

  fn fixture_with_store(db: Arc<Database>, store: Arc<dyn QueueStore>) -> Fixture {
    let remote = Arc::new(ScriptedRemote::new());
    let probe = Url::parse("http://localhost:8080/health").unwrap();
    let fetcher =
      Arc::new(ScriptedFetcher::new().route(probe.as_str(), Response::text(200, "ok")));
    let parts = Parts {
      db,
      store,
      remote: remote.clone(),
      fetcher: fetcher.clone(),
      backend: Arc::new(StubBackend::new(Response::text(200, "{}"))),
      probe_url: probe,
    };
    Fixture {
      agent: Agent::new(&Config::default(), parts).unwrap(),
      remote,
      fetcher,
    }
  }

  fn queued(agent: &Agent) -> Vec<String> {
    payloads(agent.store.as_ref())
  }

  #[tokio::test]
  async fn test_direct_send_success_skips_queue() {
    let fx = fixture();

    assert_eq!(fx.agent.send("hello").await.unwrap(), SendOutcome::Delivered);
    assert!(queued(&fx.agent).is_empty());
    assert!(!fx.agent.coordinator().is_armed());
  }

  #[tokio::test]
  async fn test_failed_send_queues_and_arms() {
    let fx = fixture();
    fx.remote.set("hello", Outcome::Unreachable);

    let outcome = fx.agent.send("hello").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Queued { reason, .. } if reason.is_network()));
    assert_eq!(queued(&fx.agent), vec!["hello"]);
    assert!(fx.agent.coordinator().is_armed());
  }

  #[tokio::test]
  async fn test_rejected_send_is_queued_too() {
    let fx = fixture();
    fx.remote.set("bad", Outcome::Reject(500));

    let outcome = fx.agent.send("bad").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Queued { .. }));
    assert_eq!(queued(&fx.agent), vec!["bad"]);
  }

  #[tokio::test]
  async fn test_reconnect_drains_queue() {
    let fx = fixture();
    fx.remote.set("m", Outcome::Unreachable);
    fx.agent.force_network(Some(NetworkState::Offline));
    fx.agent.send("m").await.unwrap();

    let mut events = fx.agent.subscribe();
    fx.remote.set("m", Outcome::Deliver);
    assert_eq!(
      fx.agent.force_network(Some(NetworkState::Online)),
      Some(SyncTrigger::ConnectivityRestored)
    );
    fx.agent.coordinator().wait_idle().await;

    assert!(queued(&fx.agent).is_empty());
    assert_eq!(events.recv().await.unwrap(), DeliveryEvent::Started { count: 1 });
    assert_eq!(
      events.recv().await.unwrap(),
      DeliveryEvent::Success { payload: "m".into() }
    );
  }

  #[tokio::test]
  async fn test_armed_agent_drains_on_next_probe() {
    let fx = fixture();
    assert_eq!(fx.agent.check_connectivity().await, None);
    assert_eq!(fx.agent.network(), Some(NetworkState::Online));

    fx.remote.set("x", Outcome::Reject(503));
    fx.agent.send("x").await.unwrap();
    fx.remote.set("x", Outcome::Deliver);

    assert_eq!(
      fx.agent.check_connectivity().await,
      Some(SyncTrigger::ConnectivityRestored)
    );
    fx.agent.coordinator().wait_idle().await;
    assert!(queued(&fx.agent).is_empty());
  }

  #[tokio::test]
  async fn test_forced_state_suppresses_probe() {
    let fx = fixture();
    fx.agent.force_network(Some(NetworkState::Offline));

    assert_eq!(fx.agent.check_connectivity().await, None);
    assert_eq!(fx.agent.network(), Some(NetworkState::Offline));
    assert!(fx.fetcher.calls().is_empty());

    fx.agent.force_network(None);
    fx.agent.check_connectivity().await;
    assert_eq!(fx.fetcher.calls().len(), 1);
    fx.agent.coordinator().wait_idle().await;
  }

  #[tokio::test]
  async fn test_pending_lists_and_rearms() {
    let fx = fixture();
    fx.remote.set("a", Outcome::Unreachable);
    fx.agent.send("a").await.unwrap();
    fx.agent.coordinator().take_armed();

    let pending = fx.agent.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, "a");
    assert!(fx.agent.coordinator().is_armed());
  }

  #[tokio::test]
  async fn test_send_reports_storage_failure() {
    let fx = fixture_with_store(memory_db(), Arc::new(BrokenStore));
    fx.remote.set("lost", Outcome::Unreachable);

    let result = fx.agent.send("lost").await;

    assert!(matches!(result, Err(StoreError::Unavailable(_))));
    assert_eq!(fx.remote.attempts(), vec!["lost"]);
    assert!(!fx.agent.coordinator().is_armed());
  }

  #[tokio::test]
  async fn test_forced_sync_keeps_unreachable_messages() {
    let fx = fixture();
    fx.remote.set("a", Outcome::Unreachable);
    fx.agent.send("a").await.unwrap();

    assert_eq!(fx.agent.force_sync(), TriggerOutcome::StartDrain);
    fx.agent.coordinator().wait_idle().await;
    assert_eq!(queued(&fx.agent), vec!["a"]);
    assert_eq!(fx.remote.attempts(), vec!["a", "a"]);
  }

  #[tokio::test]
  async fn test_foreground_triggers_drain() {
    let fx = fixture();
    fx.agent.set_visibility(Visibility::Hidden);
    assert_eq!(
      fx.agent.set_visibility(Visibility::Visible),
      Some(SyncTrigger::VisibilityForeground)
    );
    fx.agent.coordinator().wait_idle().await;
  }
}
