use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Deserialize;

use crate::config::RouteConfig;
use crate::transport::Request;

/// How a request is dispatched.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
  /// Serve from the current cache generation, fill it on a miss
  #[default]
  CacheFirst,
  /// Forward to the network; failures reach the caller untouched
  Network,
  /// Deliver to the network, queue on transport failure
  WriteIntercept,
}

/// Path matcher: exact, or a prefix when written with a trailing `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
  Exact(String),
  Prefix(String),
}

impl Pattern {
  fn parse(pattern: &str) -> Self {
    match pattern.strip_suffix('*') {
      Some(prefix) => Pattern::Prefix(prefix.to_string()),
      None => Pattern::Exact(pattern.to_string()),
    }
  }

  fn matches(&self, path: &str) -> bool {
    match self {
      Pattern::Exact(p) => path == p,
      Pattern::Prefix(p) => path.starts_with(p.as_str()),
    }
  }
}

#[derive(Debug, Clone)]
struct Route {
  pattern: Pattern,
  method: Option<Method>,
  policy: Policy,
}

/// Ordered `pattern → policy` rules.
#[derive(Debug, Clone)]
pub struct RouteTable {
  routes: Vec<Route>,
  default_policy: Policy,
}

impl RouteTable {
  pub fn from_config(routes: &[RouteConfig], default_policy: Policy) -> Result<Self> {
    let routes = routes
      .iter()
      .map(|r| {
        let method = r
          .method
          .as_deref()
          .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes())
              .map_err(|e| eyre!("Invalid method {:?} for route {}: {}", m, r.pattern, e))
          })
          .transpose()?;
        Ok(Route {
          pattern: Pattern::parse(&r.pattern),
          method,
          policy: r.policy,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      routes,
      default_policy,
    })
  }

  /// Policy for `request`. The first matching rule wins.
  ///
  /// Writes are never served from cache: a write that lands on a cache-first
  /// rule is passed through to the network instead.
  pub fn classify(&self, request: &Request) -> Policy {
    let path = request.route_path();
    let policy = self
      .routes
      .iter()
      .find(|r| {
        r.pattern.matches(path) && r.method.as_ref().map_or(true, |m| *m == request.method)
      })
      .map_or(self.default_policy, |r| r.policy);

    if policy == Policy::CacheFirst && !request.is_read() {
      Policy::Network
    } else {
      policy
    }
  }
}
