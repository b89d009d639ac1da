//! Delivery worker that drains the durable queue.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::notify::{DeliveryEvent, Notifier};
use crate::queue::QueueStore;
use crate::remote::{OutboundMessage, RemoteEndpoint};

/// Drains the queue against the remote endpoint.
///
/// Failures never escape a drain; every outcome is reported as a
/// [`DeliveryEvent`] on the notifier.
#[derive(Clone)]
pub struct DeliveryWorker {
  store: Arc<dyn QueueStore>,
  remote: Arc<dyn RemoteEndpoint>,
  notifier: Notifier,
}

impl DeliveryWorker {
  pub fn new(
    store: Arc<dyn QueueStore>,
    remote: Arc<dyn RemoteEndpoint>,
    notifier: Notifier,
  ) -> Self {
    Self {
      store,
      remote,
      notifier,
    }
  }

  /// One pass over the queue as it stood when the drain started.
  ///
  /// Items are attempted in FIFO order. A rejected item stays queued and the
  /// pass continues; a network-level failure stays queued and ends the pass,
  /// leaving later items unattempted. Messages enqueued mid-drain wait for the
  /// next pass.
  pub async fn drain(&self) {
    let messages = match self.store.list_all() {
      Ok(messages) => messages,
      Err(e) => {
        self.notifier.broadcast(DeliveryEvent::Error {
          reason: e.to_string(),
        });
        return;
      }
    };

    let total = messages.len();
    self
      .notifier
      .broadcast(DeliveryEvent::Started { count: total });

    let mut delivered = 0;
    let mut rejected = 0;

    for message in messages {
      let outbound = OutboundMessage::replay(&message);

      match self.remote.deliver(&outbound).await {
        Ok(()) => {
          if let Err(e) = self.store.remove(message.id) {
            // Delivered but still queued: it will be sent again next drain
            warn!(id = %message.id, error = %e, "Failed to remove delivered message");
            self.notifier.broadcast(DeliveryEvent::Error {
              reason: e.to_string(),
            });
            return;
          }
          delivered += 1;
          self.notifier.broadcast(DeliveryEvent::Success {
            payload: message.payload,
          });
        }
        Err(e) if e.is_network() => {
          self.notifier.broadcast(DeliveryEvent::Error {
            reason: e.to_string(),
          });
          info!(
            id = %message.id,
            delivered,
            remaining = total - delivered,
            "Network unreachable, halting drain"
          );
          return;
        }
        Err(e) => {
          rejected += 1;
          if let DeliveryError::RemoteRejected { status, body } = &e {
            debug!(id = %message.id, status, body = %body, "Remote rejected message, keeping it queued");
          }
          self.notifier.broadcast(DeliveryEvent::Error {
            reason: e.to_string(),
          });
        }
      }
    }

    info!(total, delivered, rejected, "Drain complete");
  }
}
