//! Durable outbound message queue.
//!
//! Messages land here when a direct send fails and leave only once the
//! delivery worker has confirmed their delivery.

mod message;
mod store;

pub use message::{MessageId, PendingMessage};
pub use store::{QueueStore, SqliteQueueStore};
