use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// Application-defined fields of a write. The core never interprets them.
pub type Payload = Map<String, Value>;

/// An outgoing request as issued by the UI layer.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  /// Path relative to the server base, including any query string
  pub path: String,
  pub body: Option<Payload>,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>, body: Option<Payload>) -> Self {
    Self {
      method,
      path: path.into(),
      body,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path, None)
  }

  pub fn post(path: impl Into<String>, payload: Payload) -> Self {
    Self::new(Method::POST, path, Some(payload))
  }

  /// Path with the query string stripped.
  pub fn route_path(&self) -> &str {
    self.path.split(['?', '#']).next().unwrap_or(&self.path)
  }

  /// Whether the method is read-only (GET, HEAD, OPTIONS, TRACE).
  pub fn is_read(&self) -> bool {
    self.method.is_safe()
  }
}

/// A response received from the network, read from cache, or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type,
      body,
    }
  }

  /// Build a JSON response. Serialization of a `Value` cannot fail.
  pub fn from_json(status: u16, value: &Value) -> Self {
    Self::new(
      status,
      Some("application/json".to_string()),
      value.to_string().into_bytes(),
    )
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }
}

/// Serialize any value into a JSON object payload.
///
/// Returns `None` when the value does not serialize to an object.
pub fn to_payload<T: Serialize>(value: &T) -> Option<Payload> {
  match serde_json::to_value(value).ok()? {
    Value::Object(map) => Some(map),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_route_path_strips_query() {
    let req = Request::get("/api/questions?mode=due&limit=20");
    assert_eq!(req.route_path(), "/api/questions");
    assert_eq!(Request::get("/").route_path(), "/");
  }

  #[test]
  fn test_is_read() {
    assert!(Request::get("/").is_read());
    assert!(!Request::post("/api/review", Payload::new()).is_read());
  }

  #[test]
  fn test_json_response() {
    let resp = Response::from_json(200, &json!({"synced": 3}));
    assert!(resp.is_success());
    assert_eq!(resp.content_type.as_deref(), Some("application/json"));
    let value: Value = resp.json().unwrap();
    assert_eq!(value["synced"], 3);
  }

  #[test]
  fn test_to_payload_requires_object() {
    #[derive(Serialize)]
    struct Review {
      question_id: u64,
      quality: u8,
    }
    let payload = to_payload(&Review {
      question_id: 42,
      quality: 5,
    })
    .unwrap();
    assert_eq!(payload["question_id"], 42);
    assert!(to_payload(&vec![1, 2]).is_none());
  }
}
