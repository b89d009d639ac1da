//! Observer notification channel for delivery lifecycle events.
//!
//! Delivery is fire-and-forget: sending never blocks, an observer that falls
//! behind loses the oldest events, and a gone observer is simply skipped.
//! Nothing in the delivery path depends on an observer receiving anything.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Default per-observer buffer.
pub const DEFAULT_CAPACITY: usize = 256;

/// Lifecycle event emitted by the delivery worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeliveryEvent {
  /// A drain started over `count` pending messages
  #[serde(rename = "SYNC_STARTED")]
  Started { count: usize },
  /// A queued message was delivered and removed
  #[serde(rename = "SYNC_SUCCESS")]
  Success {
    #[serde(rename = "message")]
    payload: String,
  },
  /// A delivery or storage failure
  #[serde(rename = "SYNC_ERROR")]
  Error {
    #[serde(rename = "error")]
    reason: String,
  },
}

impl fmt::Display for DeliveryEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DeliveryEvent::Started { count } => write!(f, "sync started ({} pending)", count),
      DeliveryEvent::Success { payload } => write!(f, "sync delivered \"{}\"", payload),
      DeliveryEvent::Error { reason } => write!(f, "sync failed: {}", reason),
    }
  }
}

/// Broadcasts delivery events to every registered observer.
#[derive(Clone)]
pub struct Notifier {
  tx: broadcast::Sender<DeliveryEvent>,
}

impl Notifier {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity);
    Self { tx }
  }

  /// Register a new observer.
  pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
    self.tx.subscribe()
  }

  /// Deliver `event` to all current observers and log it.
  pub fn broadcast(&self, event: DeliveryEvent) {
    match &event {
      DeliveryEvent::Error { reason } => error!(reason = %reason, "Delivery event"),
      other => info!(event = %other, "Delivery event"),
    }
    // No observers is not a failure
    let _ = self.tx.send(event);
  }
}

impl Default for Notifier {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_broadcast_without_observers() {
    let notifier = Notifier::default();
    notifier.broadcast(DeliveryEvent::Started { count: 0 });
  }

  #[test]
  fn test_every_observer_receives_event() {
    let notifier = Notifier::default();
    let mut a = notifier.subscribe();
    let mut b = notifier.subscribe();

    notifier.broadcast(DeliveryEvent::Success {
      payload: "hi".into(),
    });

    let expected = DeliveryEvent::Success {
      payload: "hi".into(),
    };
    assert_eq!(a.try_recv().unwrap(), expected);
    assert_eq!(b.try_recv().unwrap(), expected);
  }

  #[test]
  fn test_dropped_observer_does_not_affect_others() {
    let notifier = Notifier::default();
    let gone = notifier.subscribe();
    let mut alive = notifier.subscribe();
    drop(gone);

    notifier.broadcast(DeliveryEvent::Started { count: 3 });
    assert_eq!(
      alive.try_recv().unwrap(),
      DeliveryEvent::Started { count: 3 }
    );
  }

  #[test]
  fn test_lagging_observer_never_blocks_sender() {
    let notifier = Notifier::new(2);
    let mut slow = notifier.subscribe();

    for count in 0..10 {
      notifier.broadcast(DeliveryEvent::Started { count });
    }

    // The slow observer lost the oldest events but still gets the newest
    assert!(matches!(
      slow.try_recv(),
      Err(broadcast::error::TryRecvError::Lagged(_))
    ));
    assert_eq!(
      slow.try_recv().unwrap(),
      DeliveryEvent::Started { count: 8 }
    );
  }

  #[test]
  fn test_wire_shape_matches_client_protocol() {
    let json = serde_json::to_value(DeliveryEvent::Started { count: 2 }).unwrap();
    assert_eq!(json, serde_json::json!({"type": "SYNC_STARTED", "count": 2}));

    let json = serde_json::to_value(DeliveryEvent::Error {
      reason: "HTTP 500".into(),
    })
    .unwrap();
    assert_eq!(json, serde_json::json!({"type": "SYNC_ERROR", "error": "HTTP 500"}));
  }
}
