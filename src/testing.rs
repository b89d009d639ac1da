//! Scripted fakes shared by unit tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::backend::SimulatedBackend;
use crate::db::Database;
use crate::error::{DeliveryError, FetchError, StoreError};
use crate::net::{Fetcher, Request, Response};
use crate::queue::{MessageId, PendingMessage, QueueStore, SqliteQueueStore};
use crate::remote::{OutboundMessage, RemoteEndpoint};

pub fn memory_db() -> Arc<Database> {
  Arc::new(Database::open_in_memory().unwrap())
}

pub fn memory_store() -> Arc<SqliteQueueStore> {
  Arc::new(SqliteQueueStore::new(memory_db()))
}

pub fn payloads(store: &dyn QueueStore) -> Vec<String> {
  store
    .list_all()
    .unwrap()
    .into_iter()
    .map(|m| m.payload)
    .collect()
}

/// Scripted outcome for a delivery attempt.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
  Deliver,
  Reject(u16),
  Unreachable,
}

/// Remote endpoint whose outcome is scripted per payload (default: deliver).
#[derive(Default)]
pub struct ScriptedRemote {
  script: Mutex<HashMap<String, Outcome>>,
  attempts: Mutex<Vec<String>>,
  gate: Option<Arc<Semaphore>>,
}

impl ScriptedRemote {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every attempt first waits for a permit on `gate`.
  pub fn gated(gate: Arc<Semaphore>) -> Self {
    Self {
      gate: Some(gate),
      ..Self::default()
    }
  }

  pub fn on(self, payload: &str, outcome: Outcome) -> Self {
    self.set(payload, outcome);
    self
  }

  pub fn set(&self, payload: &str, outcome: Outcome) {
    self
      .script
      .lock()
      .unwrap()
      .insert(payload.to_string(), outcome);
  }

  /// Payloads in the order they were attempted.
  pub fn attempts(&self) -> Vec<String> {
    self.attempts.lock().unwrap().clone()
  }
}

impl RemoteEndpoint for ScriptedRemote {
  fn deliver<'a>(
    &'a self,
    message: &'a OutboundMessage,
  ) -> BoxFuture<'a, Result<(), DeliveryError>> {
    async move {
      if let Some(gate) = &self.gate {
        gate.acquire().await.unwrap().forget();
      }
      self.attempts.lock().unwrap().push(message.message.clone());

      let outcome = self
        .script
        .lock()
        .unwrap()
        .get(&message.message)
        .copied()
        .unwrap_or(Outcome::Deliver);

      match outcome {
        Outcome::Deliver => Ok(()),
        Outcome::Reject(status) => Err(DeliveryError::RemoteRejected {
          status,
          body: String::new(),
        }),
        Outcome::Unreachable => Err(DeliveryError::NetworkUnreachable(
          "connection refused".to_string(),
        )),
      }
    }
    .boxed()
  }
}

/// Fetcher answering from a fixed URL table; unknown URLs fail as offline.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Response>>,
  calls: Mutex<Vec<String>>,
  offline: Mutex<bool>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, url: &str, response: Response) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    *self.offline.lock().unwrap() = offline;
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Fetcher for ScriptedFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    async move {
      let url = request.url.to_string();
      self.calls.lock().unwrap().push(url.clone());

      if *self.offline.lock().unwrap() {
        return Err(FetchError::Transport("network offline".to_string()));
      }
      self
        .routes
        .lock()
        .unwrap()
        .get(&url)
        .cloned()
        .ok_or_else(|| FetchError::Transport(format!("no route to {}", url)))
    }
    .boxed()
  }
}

/// Backend that always answers with the same response and records bodies.
pub struct StubBackend {
  response: Response,
  bodies: Mutex<Vec<Vec<u8>>>,
}

impl StubBackend {
  pub fn new(response: Response) -> Self {
    Self {
      response,
      bodies: Mutex::new(Vec::new()),
    }
  }

  pub fn bodies(&self) -> Vec<Vec<u8>> {
    self.bodies.lock().unwrap().clone()
  }
}

impl SimulatedBackend for StubBackend {
  fn handle(&self, body: &[u8]) -> Response {
    self.bodies.lock().unwrap().push(body.to_vec());
    self.response.clone()
  }
}

/// Queue store whose storage is permanently unavailable.
pub struct BrokenStore;

impl QueueStore for BrokenStore {
  fn enqueue(&self, _payload: &str) -> Result<MessageId, StoreError> {
    Err(StoreError::Unavailable("disk gone".to_string()))
  }

  fn list_all(&self) -> Result<Vec<PendingMessage>, StoreError> {
    Err(StoreError::Unavailable("disk gone".to_string()))
  }

  fn remove(&self, _id: MessageId) -> Result<(), StoreError> {
    Err(StoreError::Unavailable("disk gone".to_string()))
  }

  fn len(&self) -> Result<usize, StoreError> {
    Err(StoreError::Unavailable("disk gone".to_string()))
  }
}
