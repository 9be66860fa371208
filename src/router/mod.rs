//! Request routing: cache-first, network passthrough, and write interception.
//!
//! Every outgoing request is classified by the [`RouteTable`] and dispatched
//! under one of three policies. Only an unreachable server is absorbed, by
//! queueing the write; a request that could not be built is never queued. A response from the server, including an error
//! status, always reaches the caller unmodified.

mod table;

pub use table::{Policy, RouteTable};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cache::{CacheManager, CacheSource, CacheStore};
use crate::queue::{NewMutation, QueueStore};
use crate::transport::{Payload, Request, Response, Transport, TransportError};

/// Explicit session context passed into every dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
  id: String,
}

impl Session {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into() }
  }

  /// Session with a random id.
  pub fn generate() -> Self {
    Self::new(uuid::Uuid::new_v4().to_string())
  }

  pub fn id(&self) -> &str {
    &self.id
  }
}

/// What the caller can tell the user about a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// The server (or the cache) answered successfully
  Committed,
  /// The network was unreachable; the write is pending
  Queued,
  /// The server answered with an error status
  Rejected,
}

/// A routed response plus where it came from.
#[derive(Debug, Clone)]
pub struct Routed {
  pub response: Response,
  pub source: CacheSource,
  /// When the entry was cached (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Routed {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Synthetic acceptance for a write queued while offline.
  pub fn offline(payload: Payload) -> Self {
    let body = json!({
      "success": true,
      "offline": true,
      "payload": Value::Object(payload),
    });
    Self {
      response: Response::from_json(202, &body),
      source: CacheSource::Offline,
      cached_at: None,
    }
  }

  pub fn outcome(&self) -> Outcome {
    match self.source {
      CacheSource::Offline => Outcome::Queued,
      _ if self.response.is_success() => Outcome::Committed,
      _ => Outcome::Rejected,
    }
  }
}

/// Dispatches requests according to the route table.
pub struct Router<T: Transport, Q: QueueStore, C: CacheStore> {
  transport: Arc<T>,
  queue: Arc<Q>,
  cache: CacheManager<C>,
  routes: RouteTable,
}

impl<T: Transport, Q: QueueStore, C: CacheStore> Router<T, Q, C> {
  pub fn new(transport: Arc<T>, queue: Arc<Q>, cache: CacheManager<C>, routes: RouteTable) -> Self {
    Self {
      transport,
      queue,
      cache,
      routes,
    }
  }

  /// Route `request` on behalf of `session`.
  ///
  /// Errors for network-passthrough and cache-first requests that could not
  /// reach the server, for bodiless writes that could not be queued, and for
  /// any request the transport could not build.
  pub async fn dispatch(&self, session: &Session, request: Request) -> Result<Routed, TransportError> {
    let policy = self.routes.classify(&request);
    let span = info_span!(
      "dispatch",
      session = %session.id(),
      method = %request.method,
      path = %request.path,
      ?policy
    );

    async move {
      match policy {
        Policy::Network => self.transport.send(&request).await.map(Routed::from_network),
        Policy::CacheFirst => self.cache_first(request).await,
        Policy::WriteIntercept => self.write_intercept(session, request).await,
      }
    }
    .instrument(span)
    .await
  }

  async fn cache_first(&self, request: Request) -> Result<Routed, TransportError> {
    match self.cache.lookup(&request).await {
      Ok(Some(cached)) => {
        debug!(generation = %cached.generation, "served from cache");
        return Ok(Routed::from_cache(cached.response, cached.cached_at));
      }
      Ok(None) => {}
      Err(e) => warn!(error = %e, "cache lookup failed, going to network"),
    }

    let response = self.transport.send(&request).await?;

    // Fill the cache in the background; the caller does not wait for it
    let cache = self.cache.clone();
    let fill = response.clone();
    tokio::spawn(
      async move {
        if let Err(e) = cache.populate(&request, &fill).await {
          warn!(error = %e, "cache population failed");
        }
      }
      .in_current_span(),
    );

    Ok(Routed::from_network(response))
  }

  async fn write_intercept(&self, session: &Session, request: Request) -> Result<Routed, TransportError> {
    let err = match self.transport.send(&request).await {
      Ok(response) => return Ok(Routed::from_network(response)),
      Err(err) if err.is_offline() => err,
      Err(err) => {
        warn!(error = %err, "write failed before reaching the network, not queued");
        return Err(err);
      }
    };

    let Some(payload) = request.body.clone() else {
      warn!(error = %err, "write without a body cannot be queued");
      return Err(err);
    };

    let mutation = NewMutation::new(
      request.route_path(),
      Some(session.id().to_string()),
      payload.clone(),
    );
    match self.queue.append(mutation).await {
      Ok(record) => info!(
        sequence = record.sequence,
        digest = %record.digest,
        reason = %err,
        "write queued while offline"
      ),
      // The caller still gets the offline answer; the network attempt decided it
      Err(e) => error!(error = %e, "failed to queue offline write"),
    }

    Ok(Routed::offline(payload))
  }
}

impl<T: Transport, Q: QueueStore, C: CacheStore> Clone for Router<T, Q, C> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      queue: Arc::clone(&self.queue),
      cache: self.cache.clone(),
      routes: self.routes.clone(),
    }
  }
}
