//! SQLite plumbing shared by the queue and cache stores.
//!
//! Each store owns its own connection. Two execution contexts (the
//! interactive client and the background sync loop) each open the same
//! database file and coordinate only through SQLite's per-statement and
//! per-transaction atomicity.

pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Failure of the persistent store. Fatal to the single operation attempting it.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to serialize record: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("failed to create database directory: {0}")]
  Io(#[from] std::io::Error),

  #[error("connection lock poisoned")]
  Poisoned,

  #[error("storage task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

    Self::with_connection(conn)
  }

  /// Private in-memory database
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(schema::SCHEMA)?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Run `f` against the connection on the blocking pool.
  pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
  where
    F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
    R: Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
      f(&mut guard)
    })
    .await?
  }
}
