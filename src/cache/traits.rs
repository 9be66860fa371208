//! Core types for the resource cache.

use chrono::{DateTime, Utc};

use crate::transport::{Request, Response};

/// Identity of a cacheable resource: method plus URL.
///
/// Only read requests have a key; writes are never cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
  pub method: String,
  pub url: String,
}

impl ResourceKey {
  /// Key for a GET of `url`
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
    }
  }

  /// Key for `request`, or `None` for a write.
  pub fn for_request(request: &Request) -> Option<Self> {
    if !request.is_read() {
      return None;
    }
    Some(Self {
      method: request.method.as_str().to_string(),
      url: request.path.clone(),
    })
  }
}

/// A response served from the current generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// Generation that produced the entry
  pub generation: String,
  /// When the entry was stored
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh response from the network
  Network,
  /// Served from the current cache generation
  Cache,
  /// Synthesized because the network was unreachable; the write was queued
  Offline,
}
