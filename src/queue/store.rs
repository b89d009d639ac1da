//! Queue storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::params;
use std::sync::Arc;

use super::message::{MessageId, PendingMessage};
use crate::db::Database;
use crate::error::StoreError;

/// Durable FIFO of pending messages.
///
/// Records are only ever inserted or removed, never updated. Every call is a
/// durable write or read; there is no in-memory fallback when storage fails.
pub trait QueueStore: Send + Sync {
  /// Persist a new message and return its id once the write has committed.
  fn enqueue(&self, payload: &str) -> Result<MessageId, StoreError>;

  /// All pending messages in insertion order.
  fn list_all(&self) -> Result<Vec<PendingMessage>, StoreError>;

  /// Remove a message. Removing an absent id is not an error.
  fn remove(&self, id: MessageId) -> Result<(), StoreError>;

  /// Number of pending messages.
  fn len(&self) -> Result<usize, StoreError>;

  fn is_empty(&self) -> Result<bool, StoreError> {
    Ok(self.len()? == 0)
  }
}

/// SQLite-backed queue store.
pub struct SqliteQueueStore {
  db: Arc<Database>,
}

impl SqliteQueueStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl QueueStore for SqliteQueueStore {
  fn enqueue(&self, payload: &str) -> Result<MessageId, StoreError> {
    let conn = self.db.conn()?;
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
      "INSERT INTO pending_messages (payload, created_at) VALUES (?, ?)",
      params![payload, created_at],
    )?;

    Ok(MessageId(conn.last_insert_rowid()))
  }

  fn list_all(&self) -> Result<Vec<PendingMessage>, StoreError> {
    let conn = self.db.conn()?;

    let mut stmt =
      conn.prepare("SELECT id, payload, created_at FROM pending_messages ORDER BY id")?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    rows
      .into_iter()
      .map(|(id, payload, created_at)| {
        Ok(PendingMessage {
          id: MessageId(id),
          payload,
          created_at: parse_timestamp(&created_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, id: MessageId) -> Result<(), StoreError> {
    self
      .db
      .conn()?
      .execute("DELETE FROM pending_messages WHERE id = ?", params![id.0])?;
    Ok(())
  }

  fn len(&self) -> Result<usize, StoreError> {
    let count: i64 = self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM pending_messages", [], |row| row.get(0))?;
    Ok(count as usize)
  }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Unavailable(format!("corrupt timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn memory_store() -> SqliteQueueStore {
    SqliteQueueStore::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  #[test]
  fn test_empty_store_lists_nothing() {
    let store = memory_store();
    assert!(store.list_all().unwrap().is_empty());
    assert!(store.is_empty().unwrap());
  }

  #[test]
  fn test_ids_are_monotonic_and_ordered() {
    let store = memory_store();
    let a = store.enqueue("a").unwrap();
    let b = store.enqueue("b").unwrap();
    let c = store.enqueue("c").unwrap();
    assert!(a < b && b < c);

    let payloads: Vec<_> = store
      .list_all()
      .unwrap()
      .into_iter()
      .map(|m| m.payload)
      .collect();
    assert_eq!(payloads, vec!["a", "b", "c"]);
  }

  #[test]
  fn test_ids_not_reused_after_remove() {
    let store = memory_store();
    let a = store.enqueue("a").unwrap();
    store.remove(a).unwrap();
    let b = store.enqueue("b").unwrap();
    assert!(b > a);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let store = memory_store();
    let id = store.enqueue("hello").unwrap();

    store.remove(id).unwrap();
    store.remove(id).unwrap();
    store.remove(MessageId(9999)).unwrap();

    assert_eq!(store.len().unwrap(), 0);
  }

  #[test]
  fn test_remove_keeps_other_messages() {
    let store = memory_store();
    store.enqueue("a").unwrap();
    let b = store.enqueue("b").unwrap();
    store.enqueue("c").unwrap();

    store.remove(b).unwrap();

    let payloads: Vec<_> = store
      .list_all()
      .unwrap()
      .into_iter()
      .map(|m| m.payload)
      .collect();
    assert_eq!(payloads, vec!["a", "c"]);
  }

  #[test]
  fn test_messages_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    {
      let store = SqliteQueueStore::new(Arc::new(Database::open(&path).unwrap()));
      store.enqueue("offline message").unwrap();
    }

    let store = SqliteQueueStore::new(Arc::new(Database::open(&path).unwrap()));
    let messages = store.list_all().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, "offline message");
  }

  #[test]
  fn test_created_at_is_recorded() {
    let store = memory_store();
    let before = Utc::now();
    store.enqueue("x").unwrap();
    let message = &store.list_all().unwrap()[0];
    assert!(message.created_at >= before - chrono::Duration::seconds(1));
  }
}
