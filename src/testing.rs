//! In-process fake backend for tests.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::transport::{Payload, Request, Response, Transport, TransportError};

#[derive(Default)]
struct ServerState {
  offline: bool,
  unreachable: HashSet<String>,
  invalid: HashSet<String>,
  resources: HashMap<String, Response>,
  rejections: HashMap<String, u16>,
  ingest_override: Option<Response>,
  accept_limit: Option<usize>,
  /// Distinct facts applied through ingest, in arrival order
  applied: Vec<Value>,
  seen: HashSet<String>,
  batches: Vec<Vec<Value>>,
  writes: Vec<(String, Payload)>,
  requests: Vec<String>,
}

/// Fake server whose ingest endpoint applies each distinct fact once.
pub struct FakeServer {
  ingest_path: String,
  state: Mutex<ServerState>,
}

impl FakeServer {
  pub fn new() -> Self {
    Self {
      ingest_path: "/api/sync".to_string(),
      state: Mutex::new(ServerState::default()),
    }
  }

  fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
    f(&mut self.state.lock().unwrap())
  }

  pub fn set_offline(&self, offline: bool) {
    self.with_state(|s| s.offline = offline);
  }

  /// Fail requests to `path` at the transport layer.
  pub fn set_unreachable(&self, path: &str) {
    self.with_state(|s| s.unreachable.insert(path.to_string()));
  }

  /// Fail requests to `path` as if the url could not be built.
  pub fn set_invalid(&self, path: &str) {
    self.with_state(|s| s.invalid.insert(path.to_string()));
  }

  pub fn serve(&self, path: &str, body: &str) {
    let response = Response::new(200, Some("text/plain".into()), body.as_bytes().to_vec());
    self.with_state(|s| s.resources.insert(path.to_string(), response));
  }

  /// Answer requests to `path` with an error status.
  pub fn reject(&self, path: &str, status: u16) {
    self.with_state(|s| s.rejections.insert(path.to_string(), status));
  }

  pub fn override_ingest(&self, response: Response) {
    self.with_state(|s| s.ingest_override = Some(response));
  }

  /// Acknowledge at most `limit` items per batch.
  pub fn accept_at_most(&self, limit: usize) {
    self.with_state(|s| s.accept_limit = Some(limit));
  }

  pub fn applied(&self) -> Vec<Value> {
    self.with_state(|s| s.applied.clone())
  }

  pub fn batches(&self) -> Vec<Vec<Value>> {
    self.with_state(|s| s.batches.clone())
  }

  pub fn writes(&self) -> Vec<(String, Payload)> {
    self.with_state(|s| s.writes.clone())
  }

  pub fn requests(&self) -> Vec<String> {
    self.with_state(|s| s.requests.clone())
  }

  fn handle(&self, request: &Request) -> Result<Response, TransportError> {
    let mut state = self.state.lock().unwrap();
    let path = request.route_path();
    state
      .requests
      .push(format!("{} {}", request.method, request.path));

    if state.invalid.contains(path) {
      return Err(TransportError::InvalidUrl(path.to_string()));
    }

    if state.offline || state.unreachable.contains(path) {
      return Err(TransportError::Unreachable("connection refused".into()));
    }

    if let Some(status) = state.rejections.get(path) {
      return Ok(Response::from_json(*status, &json!({"detail": "rejected"})));
    }

    if request.is_read() {
      return Ok(
        state
          .resources
          .get(&request.path)
          .cloned()
          .unwrap_or_else(|| Response::from_json(404, &json!({"detail": "not found"}))),
      );
    }

    let body = request.body.clone().unwrap_or_default();

    if path == self.ingest_path {
      if let Some(response) = state.ingest_override.clone() {
        return Ok(response);
      }
      let items = body
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
      for item in &items {
        if state.seen.insert(item.to_string()) {
          state.applied.push(item.clone());
        }
      }
      let synced = state
        .accept_limit
        .map_or(items.len(), |limit| limit.min(items.len()));
      let total = items.len();
      state.batches.push(items);
      return Ok(Response::from_json(
        200,
        &json!({"synced": synced, "total": total}),
      ));
    }

    state.writes.push((path.to_string(), body));
    Ok(Response::from_json(
      200,
      &json!({"success": true, "streak": 1}),
    ))
  }
}

impl Transport for FakeServer {
  async fn send(&self, request: &Request) -> Result<Response, TransportError> {
    self.handle(request)
  }
}

/// Build a payload from a `json!` object literal.
pub fn payload(value: Value) -> Payload {
  match value {
    Value::Object(map) => map,
    other => panic!("expected a JSON object, got {}", other),
  }
}
