//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::traits::RequestKey;
use crate::db::Database;
use crate::net::Response;

/// Meta key holding the generation the router serves from.
const ACTIVE_GENERATION: &str = "active_generation";

/// Meta key prefix marking a generation whose install completed.
const INSTALLED_PREFIX: &str = "installed:";

fn installed_key(generation: &str) -> String {
  format!("{}{}", INSTALLED_PREFIX, generation)
}

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The cached response
  pub response: Response,
  /// When the response was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Entries are partitioned by generation; a generation is written once by
/// install and dropped wholesale when another generation is activated.
pub trait CacheStorage: Send + Sync {
  /// Get a cached response in a generation.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Store a single response, unless another generation has been activated
  /// since `generation` was read. Returns whether the entry was written.
  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<bool>;

  /// Store a batch of responses and mark `generation` installed, in one
  /// transaction.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Whether `put_all` completed for `generation`.
  fn is_installed(&self, generation: &str) -> Result<bool>;

  /// Generation names with their entry counts.
  fn generations(&self) -> Result<Vec<(String, usize)>>;

  /// Generation currently served, if one was ever activated.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Mark `generation` active and delete every other generation, atomically.
  /// Returns the number of entries removed.
  fn activate(&self, generation: &str) -> Result<usize>;

  /// Delete every generation and forget the active one.
  fn purge(&self) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

/// Insert one entry. With `guard` set to the active-generation meta key the
/// row is only written while no other generation is active; with `None` the
/// subquery matches nothing and the write is unconditional.
fn insert_entry(
  conn: &rusqlite::Connection,
  generation: &str,
  key: &RequestKey,
  response: &Response,
  guard: Option<&str>,
) -> Result<bool> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  let written = conn
    .execute(
      "INSERT OR REPLACE INTO response_cache
         (generation, request_key, method, url, status, headers, body, cached_at)
       SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now')
       WHERE NOT EXISTS (SELECT 1 FROM cache_meta WHERE key = ?8 AND value <> ?1)",
      params![
        generation,
        key.cache_hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body,
        guard
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", key.description(), e))?;

  Ok(written > 0)
}

impl CacheStorage for SqliteStorage {
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM response_cache
         WHERE generation = ? AND request_key = ?",
        params![generation, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntry {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    let conn = self.db.conn()?;
    insert_entry(&conn, generation, key, response, Some(ACTIVE_GENERATION))
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      insert_entry(&tx, generation, key, response, None)?;
    }
    tx.execute(
      "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?, datetime('now'))",
      params![installed_key(generation)],
    )
    .map_err(|e| eyre!("Failed to mark {} installed: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn is_installed(&self, generation: &str) -> Result<bool> {
    let conn = self.db.conn()?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_meta WHERE key = ?",
        params![installed_key(generation)],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read install state: {}", e))?;
    Ok(found.is_some())
  }

  fn generations(&self) -> Result<Vec<(String, usize)>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT generation, COUNT(*) FROM response_cache
         GROUP BY generation ORDER BY generation",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let generations = stmt
      .query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
      })
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read generations: {}", e))?;

    Ok(generations)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self.db.conn()?;

    conn
      .query_row(
        "SELECT value FROM cache_meta WHERE key = ?",
        params![ACTIVE_GENERATION],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active generation: {}", e))
  }

  fn activate(&self, generation: &str) -> Result<usize> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let removed = tx
      .execute(
        "DELETE FROM response_cache WHERE generation <> ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete old generations: {}", e))?;
    tx.execute(
      "DELETE FROM cache_meta WHERE key LIKE ? AND key <> ?",
      params![format!("{}%", INSTALLED_PREFIX), installed_key(generation)],
    )
    .map_err(|e| eyre!("Failed to forget old generations: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?, ?)",
      params![ACTIVE_GENERATION, generation],
    )
    .map_err(|e| eyre!("Failed to record active generation: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed)
  }

  fn purge(&self) -> Result<usize> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let removed = tx
      .execute("DELETE FROM response_cache", [])
      .map_err(|e| eyre!("Failed to purge cache: {}", e))?;
    tx.execute(
      "DELETE FROM cache_meta WHERE key = ? OR key LIKE ?",
      params![ACTIVE_GENERATION, format!("{}%", INSTALLED_PREFIX)],
    )
    .map_err(|e| eyre!("Failed to clear active generation: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
