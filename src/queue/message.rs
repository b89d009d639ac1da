use chrono::{DateTime, Utc};
use std::fmt;

/// Identifier assigned to a pending message at enqueue time.
///
/// Ids are monotonic, so ordering by id is delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// An outbound message waiting for confirmed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
  pub id: MessageId,
  /// Opaque text supplied by the sender
  pub payload: String,
  /// When the message was enqueued
  pub created_at: DateTime<Utc>,
}
