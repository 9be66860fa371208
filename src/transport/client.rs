use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

use crate::config::Config;

use super::types::{Request, Response};

/// Failure to get any response from the server.
///
/// A server that answers with an error status is not a transport failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("server unreachable: {0}")]
  Unreachable(String),

  #[error("request timed out")]
  Timeout,

  #[error("invalid request url: {0}")]
  InvalidUrl(String),

  /// The request could not be built or its redirects followed
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl TransportError {
  /// True when the server could not be reached at all.
  ///
  /// Only these failures may be absorbed by queueing a write.
  pub fn is_offline(&self) -> bool {
    matches!(self, Self::Unreachable(_) | Self::Timeout)
  }
}

/// Network boundary used by the router, the reconciler and the cache installer.
pub trait Transport: Send + Sync + 'static {
  fn send(&self, request: &Request) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

/// HTTP transport backed by reqwest
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.server.url)
      .map_err(|e| eyre!("Invalid server url {}: {}", config.server.url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.server.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base
      .join(path)
      .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", path, e)))
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> Result<Response, TransportError> {
    let url = self.url_for(&request.path)?;

    let mut builder = self.client.request(request.method.clone(), url);
    if let Some(body) = &request.body {
      // Map<String, Value> always serializes
      let bytes = serde_json::to_vec(body).unwrap_or_default();
      builder = builder
        .header(CONTENT_TYPE, "application/json")
        .body(bytes);
    }

    let response = builder.send().await.map_err(classify)?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response.bytes().await.map_err(classify)?;

    Ok(Response::new(status, content_type, body.to_vec()))
  }
}

fn classify(err: reqwest::Error) -> TransportError {
  if err.is_timeout() {
    TransportError::Timeout
  } else if err.is_builder() || err.is_redirect() {
    TransportError::InvalidRequest(err.to_string())
  } else {
    TransportError::Unreachable(err.to_string())
  }
}
