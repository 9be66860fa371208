//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::future::Future;

use crate::db::{Database, StoreError};
use crate::transport::Response;

use super::traits::{CachedResponse, ResourceKey};

/// Trait for cache storage backends.
///
/// Each method is a single atomic operation on the underlying store.
pub trait CacheStore: Send + Sync + 'static {
  /// Tag of the generation currently serving, if any.
  fn current_generation(&self) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

  /// Write a complete generation in one transaction.
  ///
  /// A non-current generation is rebuilt from scratch and left in the
  /// installed state. Staging into the current generation upserts in place.
  fn stage(
    &self,
    tag: String,
    entries: Vec<(ResourceKey, Response)>,
  ) -> impl Future<Output = Result<usize, StoreError>> + Send;

  /// Make `tag` current and evict every other generation.
  ///
  /// Returns the number of evicted entries, or `None` if `tag` was never staged.
  fn promote(&self, tag: String) -> impl Future<Output = Result<Option<usize>, StoreError>> + Send;

  /// Get an entry from the current generation.
  fn get(
    &self,
    key: ResourceKey,
  ) -> impl Future<Output = Result<Option<CachedResponse>, StoreError>> + Send;

  /// Store an entry into the current generation, overwriting any existing one.
  ///
  /// Returns false when no generation is current.
  fn put(
    &self,
    key: ResourceKey,
    response: Response,
  ) -> impl Future<Output = Result<bool, StoreError>> + Send;

  /// Remove an entry from the current generation.
  fn remove(&self, key: ResourceKey) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteCache {
  db: Database,
}

impl SqliteCache {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl CacheStore for SqliteCache {
  async fn current_generation(&self) -> Result<Option<String>, StoreError> {
    self
      .db
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT tag FROM cache_generations WHERE state = 'current'",
              [],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await
  }

  async fn stage(
    &self,
    tag: String,
    entries: Vec<(ResourceKey, Response)>,
  ) -> Result<usize, StoreError> {
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let state: Option<String> = tx
          .query_row(
            "SELECT state FROM cache_generations WHERE tag = ?",
            params![tag],
            |row| row.get(0),
          )
          .optional()?;

        if state.as_deref() != Some("current") {
          // Drop leftovers from an earlier install of the same tag
          tx.execute(
            "DELETE FROM cache_entries WHERE generation = ?",
            params![tag],
          )?;
          tx.execute(
            "INSERT OR REPLACE INTO cache_generations (tag, state, created_at)
             VALUES (?, 'installed', datetime('now'))",
            params![tag],
          )?;
        }

        for (key, response) in &entries {
          tx.execute(
            "INSERT OR REPLACE INTO cache_entries
               (generation, method, url, status, content_type, body, cached_at)
             VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
            params![
              tag,
              key.method,
              key.url,
              response.status,
              response.content_type,
              response.body
            ],
          )?;
        }

        tx.commit()?;
        Ok(entries.len())
      })
      .await
  }

  async fn promote(&self, tag: String) -> Result<Option<usize>, StoreError> {
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<String> = tx
          .query_row(
            "SELECT state FROM cache_generations WHERE tag = ?",
            params![tag],
            |row| row.get(0),
          )
          .optional()?;
        if exists.is_none() {
          return Ok(None);
        }

        let evicted = tx.execute(
          "DELETE FROM cache_entries WHERE generation != ?",
          params![tag],
        )?;
        tx.execute(
          "DELETE FROM cache_generations WHERE tag != ?",
          params![tag],
        )?;
        tx.execute(
          "UPDATE cache_generations SET state = 'current' WHERE tag = ?",
          params![tag],
        )?;

        tx.commit()?;
        Ok(Some(evicted))
      })
      .await
  }

  async fn get(&self, key: ResourceKey) -> Result<Option<CachedResponse>, StoreError> {
    self
      .db
      .call(move |conn| {
        let row: Option<(String, u16, Option<String>, Vec<u8>, String)> = conn
          .query_row(
            "SELECT e.generation, e.status, e.content_type, e.body, e.cached_at
             FROM cache_entries e
             INNER JOIN cache_generations g ON g.tag = e.generation
             WHERE g.state = 'current' AND e.method = ? AND e.url = ?",
            params![key.method, key.url],
            |row| {
              Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
              ))
            },
          )
          .optional()?;

        Ok(row.map(|(generation, status, content_type, body, cached_at)| {
          CachedResponse {
            response: Response::new(status, content_type, body),
            generation,
            cached_at: parse_datetime(&cached_at),
          }
        }))
      })
      .await
  }

  async fn put(&self, key: ResourceKey, response: Response) -> Result<bool, StoreError> {
    self
      .db
      .call(move |conn| {
        // Resolving the current generation inside the statement keeps the
        // write atomic with respect to a concurrent promote.
        let stored = conn.execute(
          "INSERT OR REPLACE INTO cache_entries
             (generation, method, url, status, content_type, body, cached_at)
           SELECT tag, ?, ?, ?, ?, ?, datetime('now')
           FROM cache_generations WHERE state = 'current'",
          params![
            key.method,
            key.url,
            response.status,
            response.content_type,
            response.body
          ],
        )?;
        Ok(stored > 0)
      })
      .await
  }

  async fn remove(&self, key: ResourceKey) -> Result<bool, StoreError> {
    self
      .db
      .call(move |conn| {
        let removed = conn.execute(
          "DELETE FROM cache_entries
           WHERE method = ? AND url = ?
             AND generation IN (SELECT tag FROM cache_generations WHERE state = 'current')",
          params![key.method, key.url],
        )?;
        Ok(removed > 0)
      })
      .await
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> DateTime<Utc> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .unwrap_or_else(|_| Utc::now())
}
