//! Offline-capable client that wires the router, queue, cache and reconciler.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheManager, SqliteCache};
use crate::config::Config;
use crate::db::Database;
use crate::queue::{QueueStore, SqliteQueue};
use crate::router::{RouteTable, Routed, Router, Session};
use crate::sync::{
  ConnectivityMonitor, FlushOutcome, Reconciler, SyncTrigger, TriggerHandler, WakeRegistry,
};
use crate::transport::{HttpTransport, Request};

/// Snapshot of local offline state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
  /// Writes waiting for the next flush
  pub pending: usize,
  /// Generation currently serving cached resources
  pub generation: Option<String>,
  /// Generation this configuration installs
  pub version: String,
}

/// Client with transparent caching and offline write queueing.
///
/// Each instance owns one connection to the local database, so an
/// interactive client and a background sync loop are independent actors
/// that share state only through the store.
#[derive(Clone)]
pub struct OfflineClient {
  transport: Arc<HttpTransport>,
  queue: Arc<SqliteQueue>,
  cache: CacheManager<SqliteCache>,
  router: Router<HttpTransport, SqliteQueue, SqliteCache>,
  reconciler: Reconciler<HttpTransport, SqliteQueue>,
  config: Config,
}

impl OfflineClient {
  pub fn new(config: &Config) -> Result<Self> {
    let path = config.database_path()?;
    let db = Database::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    let transport = Arc::new(HttpTransport::new(config)?);
    let queue = Arc::new(SqliteQueue::new(db.clone()));
    let cache = CacheManager::new(SqliteCache::new(db), config.cache.version.as_str());
    let routes = RouteTable::from_config(&config.routes, config.default_policy)?;

    let router = Router::new(
      Arc::clone(&transport),
      Arc::clone(&queue),
      cache.clone(),
      routes,
    );
    let reconciler = Reconciler::new(
      Arc::clone(&transport),
      Arc::clone(&queue),
      config.server.ingest_path.as_str(),
      config.sync.partial_ack,
    );

    Ok(Self {
      transport,
      queue,
      cache,
      router,
      reconciler,
      config: config.clone(),
    })
  }

  /// Route a request. Only unreachable reads fail; offline writes are queued.
  pub async fn send(&self, session: &Session, request: Request) -> Result<Routed> {
    let method = request.method.clone();
    let path = request.path.clone();
    self
      .router
      .dispatch(session, request)
      .await
      .map_err(|e| eyre!("{} {} failed: {}", method, path, e))
  }

  /// Deliver pending writes now.
  pub async fn flush(&self) -> Result<FlushOutcome> {
    Ok(self.reconciler.flush().await?)
  }

  /// Fetch the configured manifest into a new cache generation.
  pub async fn install(&self) -> Result<usize> {
    Ok(
      self
        .cache
        .install(self.transport.as_ref(), &self.config.cache.manifest)
        .await?,
    )
  }

  /// Make the installed generation current.
  pub async fn activate(&self) -> Result<usize> {
    Ok(self.cache.activate().await?)
  }

  /// Drop the cached GET response for `path`.
  pub async fn invalidate(&self, path: &str) -> Result<bool> {
    Ok(self.cache.invalidate(&Request::get(path)).await?)
  }

  pub async fn status(&self) -> Result<Status> {
    Ok(Status {
      pending: self.queue.len().await?,
      generation: self.cache.current_generation().await?,
      version: self.cache.version().to_string(),
    })
  }

  /// Build the background sync loop.
  ///
  /// Registers the configured wake tag with `registry` and starts the
  /// connectivity monitor. A startup flush is queued.
  pub fn sync_trigger(
    &self,
    registry: &WakeRegistry,
  ) -> SyncTrigger<HttpTransport, SqliteQueue> {
    let events = TriggerHandler::new();
    registry.register(self.config.sync.wake_tag.as_str(), events.sender());

    ConnectivityMonitor::new(
      Arc::clone(&self.transport),
      self.config.server.probe_path.as_str(),
      Duration::from_secs(self.config.sync.probe_interval_secs.max(1)),
    )
    .spawn(events.sender());

    SyncTrigger::new(self.reconciler.clone(), events)
  }
}
