//! Queue storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};
use std::future::Future;

use crate::db::{Database, StoreError};

use super::record::{MutationRecord, NewMutation};

/// Pending records as read for one flush.
#[derive(Debug, Clone, Default)]
pub struct Batch {
  /// Readable records in insertion order
  pub records: Vec<MutationRecord>,
  /// Highest sequence scanned, including rows that could not be read
  pub through: Option<i64>,
}

/// Ordered, persistent collection of pending mutations.
///
/// Every operation is independently atomic. There is no lock spanning
/// operations; concurrent writers rely on replay being idempotent.
pub trait QueueStore: Send + Sync + 'static {
  /// Append to the end of the queue.
  fn append(
    &self,
    mutation: NewMutation,
  ) -> impl Future<Output = Result<MutationRecord, StoreError>> + Send;

  /// All records in insertion order. Does not modify the queue.
  fn read_all(&self) -> impl Future<Output = Result<Vec<MutationRecord>, StoreError>> + Send;

  /// Like [`QueueStore::read_all`], also reporting how far the scan reached.
  fn read_batch(&self) -> impl Future<Output = Result<Batch, StoreError>> + Send;

  /// Remove every record.
  fn clear(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;

  /// Remove every record with `sequence <= last`.
  ///
  /// Records appended after a batch was read keep a higher sequence and survive.
  fn clear_through(&self, last: i64) -> impl Future<Output = Result<usize, StoreError>> + Send;

  /// Number of pending records.
  fn len(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

/// SQLite-based queue storage.
#[derive(Clone)]
pub struct SqliteQueue {
  db: Database,
}

impl SqliteQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl QueueStore for SqliteQueue {
  async fn append(&self, mutation: NewMutation) -> Result<MutationRecord, StoreError> {
    let digest = mutation.digest();
    let payload = serde_json::to_string(&mutation.payload)?;

    self
      .db
      .call(move |conn| {
        // IMMEDIATE takes the write lock up front so the max(enqueued_at)
        // read and the insert see the same queue.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last: Option<i64> =
          tx.query_row("SELECT MAX(enqueued_at) FROM pending_mutations", [], |row| {
            row.get(0)
          })?;
        let now = Utc::now().timestamp_millis();
        let enqueued_at = last.map_or(now, |last| last.max(now));

        tx.execute(
          "INSERT INTO pending_mutations (origin, session, digest, payload, enqueued_at)
           VALUES (?, ?, ?, ?, ?)",
          params![mutation.origin, mutation.session, digest, payload, enqueued_at],
        )?;
        let sequence = tx.last_insert_rowid();
        tx.commit()?;

        Ok(MutationRecord {
          sequence,
          origin: mutation.origin,
          session: mutation.session,
          digest,
          payload: mutation.payload,
          enqueued_at: from_millis(enqueued_at),
        })
      })
      .await
  }

  async fn read_all(&self) -> Result<Vec<MutationRecord>, StoreError> {
    Ok(self.read_batch().await?.records)
  }

  async fn read_batch(&self) -> Result<Batch, StoreError> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT sequence, origin, session, digest, payload, enqueued_at
           FROM pending_mutations
           ORDER BY sequence",
        )?;

        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, Option<String>>(2)?,
              row.get::<_, String>(3)?,
              row.get::<_, String>(4)?,
              row.get::<_, i64>(5)?,
            ))
          })?
          .collect::<Result<Vec<_>, _>>()?;

        let through = rows.last().map(|row| row.0);
        let records = rows
          .into_iter()
          .filter_map(|(sequence, origin, session, digest, payload, enqueued_at)| {
            match serde_json::from_str(&payload) {
              Ok(payload) => Some(MutationRecord {
                sequence,
                origin,
                session,
                digest,
                payload,
                enqueued_at: from_millis(enqueued_at),
              }),
              Err(e) => {
                tracing::warn!(sequence, error = %e, "skipping unreadable queued mutation");
                None
              }
            }
          })
          .collect();

        Ok(Batch { records, through })
      })
      .await
  }

  async fn clear(&self) -> Result<usize, StoreError> {
    self
      .db
      .call(|conn| Ok(conn.execute("DELETE FROM pending_mutations", [])?))
      .await
  }

  async fn clear_through(&self, last: i64) -> Result<usize, StoreError> {
    self
      .db
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM pending_mutations WHERE sequence <= ?",
          params![last],
        )?)
      })
      .await
  }

  async fn len(&self) -> Result<usize, StoreError> {
    self
      .db
      .call(|conn| {
        let count: i64 =
          conn.query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| row.get(0))?;
        Ok(count as usize)
      })
      .await
  }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
