//! Remote delivery endpoint.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{DeliveryError, FetchError};
use crate::queue::PendingMessage;

/// Source tag for sends attempted at the moment the user sends.
pub const SOURCE_DIRECT: &str = "postlane-direct";
/// Source tag for sends replayed from the queue.
pub const SOURCE_SYNC: &str = "postlane-background-sync";

/// JSON body posted to the delivery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
  pub message: String,
  /// When the user originally sent the message
  pub timestamp: DateTime<Utc>,
  /// When a queued message was replayed
  #[serde(skip_serializing_if = "Option::is_none")]
  pub synced_at: Option<DateTime<Utc>>,
  pub source: String,
}

impl OutboundMessage {
  /// A fresh message sent directly by the user.
  pub fn direct(payload: &str) -> Self {
    Self {
      message: payload.to_string(),
      timestamp: Utc::now(),
      synced_at: None,
      source: SOURCE_DIRECT.to_string(),
    }
  }

  /// A queued message being replayed by a drain.
  pub fn replay(pending: &PendingMessage) -> Self {
    Self {
      message: pending.payload.clone(),
      timestamp: pending.created_at,
      synced_at: Some(Utc::now()),
      source: SOURCE_SYNC.to_string(),
    }
  }
}

/// Endpoint that accepts delivered messages.
///
/// `Ok` means the endpoint confirmed the message (2xx).
pub trait RemoteEndpoint: Send + Sync {
  fn deliver<'a>(&'a self, message: &'a OutboundMessage)
    -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// HTTP delivery over `reqwest`.
pub struct HttpRemote {
  client: Client,
  endpoint: Url,
}

impl HttpRemote {
  pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, FetchError> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, endpoint })
  }

  async fn post(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
    debug!(url = %self.endpoint, source = %message.source, "Delivering message");

    let response = self
      .client
      .post(self.endpoint.clone())
      .json(message)
      .send()
      .await
      .map_err(|e| DeliveryError::NetworkUnreachable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(DeliveryError::RemoteRejected {
        status: status.as_u16(),
        body,
      });
    }

    Ok(())
  }
}

impl RemoteEndpoint for HttpRemote {
  fn deliver<'a>(
    &'a self,
    message: &'a OutboundMessage,
  ) -> BoxFuture<'a, Result<(), DeliveryError>> {
    self.post(message).boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::MessageId;

  #[test]
  fn test_replay_body_shape() {
    let pending = PendingMessage {
      id: MessageId(7),
      payload: "hello".into(),
      created_at: Utc::now(),
    };
    let body = serde_json::to_value(OutboundMessage::replay(&pending)).unwrap();

    assert_eq!(body["message"], "hello");
    assert_eq!(body["source"], SOURCE_SYNC);
    assert!(body.get("timestamp").is_some());
    assert!(body.get("syncedAt").is_some());
  }

  #[test]
  fn test_direct_body_has_no_synced_at() {
    let body = serde_json::to_value(OutboundMessage::direct("now")).unwrap();
    assert_eq!(body["source"], SOURCE_DIRECT);
    assert!(body.get("syncedAt").is_none());
  }

  #[tokio::test]
  async fn test_refused_connection_is_network_failure() {
    // Nothing listens on port 9 of the loopback interface
    let endpoint = Url::parse("http://127.0.0.1:9/post").unwrap();
    let remote = HttpRemote::new(endpoint, Duration::from_secs(2)).unwrap();

    let err = remote
      .deliver(&OutboundMessage::direct("x"))
      .await
      .unwrap_err();
    assert!(err.is_network());
  }
}
