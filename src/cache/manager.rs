//! Cache manager that owns generation lifecycle and cache fills.

use futures::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::StoreError;
use crate::transport::{Request, Response, Transport, TransportError};

use super::storage::CacheStore;
use super::traits::{CachedResponse, ResourceKey};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to fetch {url}: {source}")]
  Fetch {
    url: String,
    #[source]
    source: TransportError,
  },

  #[error("failed to fetch {url}: server answered {status}")]
  Status { url: String, status: u16 },

  #[error("cache generation {0} has not been installed")]
  NotInstalled(String),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Versioned snapshot of static resources.
///
/// Exactly one generation serves at a time. A new generation is fully
/// written before it can be promoted, and promotion evicts every other
/// generation in the same transaction, so readers never see a gap.
pub struct CacheManager<S: CacheStore> {
  storage: Arc<S>,
  /// Generation tag this build installs and activates
  version: String,
}

impl<S: CacheStore> CacheManager<S> {
  pub fn new(storage: S, version: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub async fn current_generation(&self) -> Result<Option<String>, StoreError> {
    self.storage.current_generation().await
  }

  /// Fetch every manifest resource and store them as this version's generation.
  ///
  /// All-or-nothing: if any fetch fails or answers with a non-2xx status,
  /// nothing is written and the current generation keeps serving.
  pub async fn install<T: Transport>(
    &self,
    transport: &T,
    manifest: &[String],
  ) -> Result<usize, CacheError> {
    let fetches = manifest.iter().map(|url| async move {
      let response = transport
        .send(&Request::get(url.as_str()))
        .await
        .map_err(|source| CacheError::Fetch {
          url: url.clone(),
          source,
        })?;

      if !response.is_success() {
        return Err(CacheError::Status {
          url: url.clone(),
          status: response.status,
        });
      }

      Ok((ResourceKey::get(url.as_str()), response))
    });

    let entries = try_join_all(fetches).await?;
    let count = self.storage.stage(self.version.clone(), entries).await?;

    info!(generation = %self.version, resources = count, "cache generation installed");
    Ok(count)
  }

  /// Promote this version's generation and evict all others.
  pub async fn activate(&self) -> Result<usize, CacheError> {
    let evicted = self
      .storage
      .promote(self.version.clone())
      .await?
      .ok_or_else(|| CacheError::NotInstalled(self.version.clone()))?;

    info!(generation = %self.version, evicted, "cache generation activated");
    Ok(evicted)
  }

  /// Cached response for `request` from the current generation.
  ///
  /// Writes never hit the cache.
  pub async fn lookup(&self, request: &Request) -> Result<Option<CachedResponse>, StoreError> {
    match ResourceKey::for_request(request) {
      Some(key) => self.storage.get(key).await,
      None => Ok(None),
    }
  }

  /// Store `response` for `request` into the current generation.
  ///
  /// Only successful responses to reads are stored. Returns whether an
  /// entry was written.
  pub async fn populate(&self, request: &Request, response: &Response) -> Result<bool, StoreError> {
    let Some(key) = ResourceKey::for_request(request) else {
      return Ok(false);
    };
    if !response.is_success() {
      debug!(url = %key.url, status = response.status, "not caching unsuccessful response");
      return Ok(false);
    }

    let stored = self.storage.put(key, response.clone()).await?;
    if !stored {
      debug!(url = %request.path, "no current cache generation, response not stored");
    }
    Ok(stored)
  }

  /// Drop the cached entry for `request`.
  pub async fn invalidate(&self, request: &Request) -> Result<bool, StoreError> {
    match ResourceKey::for_request(request) {
      Some(key) => self.storage.remove(key).await,
      None => Ok(false),
    }
  }
}

impl<S: CacheStore> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      version: self.version.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteCache;
  use crate::db::Database;
  use crate::testing::FakeServer;
  use crate::transport::Payload;

  fn manifest(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
  }

  fn manager(db: &Database, version: &str) -> CacheManager<SqliteCache> {
    CacheManager::new(SqliteCache::new(db.clone()), version)
  }

  async fn body(manager: &CacheManager<SqliteCache>, url: &str) -> Option<Vec<u8>> {
    manager
      .lookup(&Request::get(url))
      .await
      .unwrap()
      .map(|c| c.response.body)
  }

  #[tokio::test]
  async fn test_install_then_activate() {
    let server = FakeServer::new();
    server.serve("/", "home");
    server.serve("/static/app.js", "app");
    let db = Database::open_in_memory().unwrap();
    let cache = manager(&db, "v1");

    let installed = cache
      .install(&server, &manifest(&["/", "/static/app.js"]))
      .await
      .unwrap();
    assert_eq!(installed, 2);
    assert_eq!(body(&cache, "/").await, None);

    cache.activate().await.unwrap();
    assert_eq!(body(&cache, "/").await, Some(b"home".to_vec()));
    assert_eq!(body(&cache, "/static/app.js").await, Some(b"app".to_vec()));
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_generation() {
    let server = FakeServer::new();
    server.serve("/", "home v1");
    let db = Database::open_in_memory().unwrap();

    let v1 = manager(&db, "v1");
    v1.install(&server, &manifest(&["/"])).await.unwrap();
    v1.activate().await.unwrap();

    server.serve("/", "home v2");
    server.set_unreachable("/static/app.js");
    let v2 = manager(&db, "v2");
    let err = v2
      .install(&server, &manifest(&["/", "/static/app.js"]))
      .await
      .unwrap_err();
    assert!(matches!(err, CacheError::Fetch { .. }));

    // The partial generation can never be promoted
    assert!(matches!(
      v2.activate().await.unwrap_err(),
      CacheError::NotInstalled(_)
    ));
    assert_eq!(v2.current_generation().await.unwrap().as_deref(), Some("v1"));
    assert_eq!(body(&v2, "/").await, Some(b"home v1".to_vec()));
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let server = FakeServer::new();
    server.serve("/", "home");
    let db = Database::open_in_memory().unwrap();
    let cache = manager(&db, "v1");

    let err = cache
      .install(&server, &manifest(&["/", "/missing.css"]))
      .await
      .unwrap_err();
    assert!(matches!(err, CacheError::Status { status: 404, .. }));
    assert!(cache.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_activate_evicts_old_generation() {
    let server = FakeServer::new();
    server.serve("/", "home v1");
    server.serve("/legacy.js", "legacy");
    let db = Database::open_in_memory().unwrap();

    let v1 = manager(&db, "v1");
    v1.install(&server, &manifest(&["/", "/legacy.js"])).await.unwrap();
    v1.activate().await.unwrap();

    server.serve("/", "home v2");
    let v2 = manager(&db, "v2");
    v2.install(&server, &manifest(&["/"])).await.unwrap();
    assert_eq!(body(&v2, "/").await, Some(b"home v1".to_vec()));

    assert_eq!(v2.activate().await.unwrap(), 2);
    assert_eq!(body(&v2, "/").await, Some(b"home v2".to_vec()));
    assert_eq!(body(&v2, "/legacy.js").await, None);
  }

  #[tokio::test]
  async fn test_populate_skips_writes_and_errors() {
    let db = Database::open_in_memory().unwrap();
    let cache = manager(&db, "v1");
    cache.install(&FakeServer::new(), &[]).await.unwrap();
    cache.activate().await.unwrap();

    let ok = Response::new(200, None, b"fresh".to_vec());
    let missing = Response::new(404, None, Vec::new());
    let write = Request::post("/api/review", Payload::new());

    assert!(!cache.populate(&write, &ok).await.unwrap());
    assert!(!cache.populate(&Request::get("/gone"), &missing).await.unwrap());
    assert!(cache.populate(&Request::get("/fresh"), &ok).await.unwrap());
    assert_eq!(body(&cache, "/fresh").await, Some(b"fresh".to_vec()));
    assert!(cache.lookup(&write).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_invalidate() {
    let db = Database::open_in_memory().unwrap();
    let cache = manager(&db, "v1");
    cache.install(&FakeServer::new(), &[]).await.unwrap();
    cache.activate().await.unwrap();

    let req = Request::get("/page");
    cache
      .populate(&req, &Response::new(200, None, b"page".to_vec()))
      .await
      .unwrap();
    assert!(cache.invalidate(&req).await.unwrap());
    assert_eq!(body(&cache, "/page").await, None);
  }
}
