//! Simulated message API served in place of the network for mock requests.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::net::Response;

/// Answers POSTs to the mock API path.
pub trait SimulatedBackend: Send + Sync {
  fn handle(&self, body: &[u8]) -> Response;

  /// Follow the observed connectivity. Backends that ignore it keep the default.
  fn set_online(&self, _online: bool) {}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
  message: String,
  #[serde(default)]
  synced_at: Option<DateTime<Utc>>,
}

/// Backend that fails a configurable fraction of requests and rejects
/// everything while marked offline.
pub struct FaultInjectingBackend {
  failure_rate: f64,
  online: AtomicBool,
}

impl FaultInjectingBackend {
  pub fn new(failure_rate: f64) -> Self {
    Self {
      failure_rate: failure_rate.clamp(0.0, 1.0),
      online: AtomicBool::new(true),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Answer `body` given a roll in `[0, 1)`; rolls below the failure rate fail.
  fn respond(&self, body: &[u8], roll: f64) -> Response {
    let incoming: IncomingMessage = match serde_json::from_slice(body) {
      Ok(incoming) => incoming,
      Err(e) => {
        debug!(error = %e, "Mock API received unreadable body");
        return network_error();
      }
    };

    if !self.is_online() {
      debug!("Mock API offline, rejecting request");
      return network_error();
    }

    if roll < self.failure_rate {
      debug!("Mock API simulating server error");
      return Response::json(500, &json!({ "error": "Server error (simulated)" }));
    }

    Response::json(
      200,
      &json!({
        "success": true,
        "message": incoming.message,
        "receivedAt": Utc::now().to_rfc3339(),
        "syncedAt": incoming.synced_at.map(|t| t.to_rfc3339()),
      }),
    )
  }
}

fn network_error() -> Response {
  Response::json(503, &json!({ "error": "Network error" }))
}

impl SimulatedBackend for FaultInjectingBackend {
  fn handle(&self, body: &[u8]) -> Response {
    let roll = rand::thread_rng().gen::<f64>();
    self.respond(body, roll)
  }

  fn set_online(&self, online: bool) {
    let was = self.online.swap(online, Ordering::SeqCst);
    if was != online {
      info!(online, "Simulated backend connectivity changed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Value;

  fn body(value: Value) -> Vec<u8> {
    value.to_string().into_bytes()
  }

  fn parsed(response: &Response) -> Value {
    serde_json::from_slice(&response.body).unwrap()
  }

  #[test]
  fn test_success_echoes_message() {
    let backend = FaultInjectingBackend::new(0.2);
    let response = backend.respond(
      &body(json!({"message": "hi", "timestamp": "2024-01-01T00:00:00Z"})),
      0.9,
    );

    assert_eq!(response.status, 200);
    let json = parsed(&response);
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "hi");
    assert!(json["receivedAt"].is_string());
    assert!(json["syncedAt"].is_null());
  }

  #[test]
  fn test_success_keeps_synced_at() {
    let backend = FaultInjectingBackend::new(0.0);
    let response = backend.respond(
      &body(json!({"message": "hi", "syncedAt": "2024-01-01T00:00:00Z"})),
      0.5,
    );
    assert_eq!(parsed(&response)["syncedAt"], "2024-01-01T00:00:00+00:00");
  }

  #[test]
  fn test_low_roll_is_server_error() {
    let backend = FaultInjectingBackend::new(0.2);
    let response = backend.respond(&body(json!({"message": "hi"})), 0.1);

    assert_eq!(response.status, 500);
    assert_eq!(parsed(&response)["error"], "Server error (simulated)");
  }

  #[test]
  fn test_offline_rejects_regardless_of_roll() {
    let backend = FaultInjectingBackend::new(0.0);
    backend.set_online(false);
    let response = backend.respond(&body(json!({"message": "hi"})), 0.99);

    assert_eq!(response.status, 503);
    assert_eq!(parsed(&response)["error"], "Network error");

    backend.set_online(true);
    assert_eq!(backend.respond(&body(json!({"message": "hi"})), 0.99).status, 200);
  }

  #[test]
  fn test_unreadable_body_is_network_error() {
    let backend = FaultInjectingBackend::new(0.0);
    assert_eq!(backend.respond(b"not json", 0.5).status, 503);
  }

  #[test]
  fn test_failure_rate_is_clamped() {
    let backend = FaultInjectingBackend::new(3.0);
    assert_eq!(backend.handle(&body(json!({"message": "x"}))).status, 500);
  }
}
