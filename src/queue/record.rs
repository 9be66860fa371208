use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::transport::Payload;

/// A write captured by the router, before the store assigns its position.
#[derive(Debug, Clone)]
pub struct NewMutation {
  /// Request path the write was addressed to
  pub origin: String,
  /// Session that issued the write
  pub session: Option<String>,
  pub payload: Payload,
}

impl NewMutation {
  pub fn new(origin: impl Into<String>, session: Option<String>, payload: Payload) -> Self {
    Self {
      origin: origin.into(),
      session,
      payload,
    }
  }

  /// SHA-256 of the canonical payload encoding.
  ///
  /// `serde_json::Map` keeps keys sorted, so equal payloads encode identically
  /// regardless of the order fields were inserted in.
  pub fn digest(&self) -> String {
    let canonical = Value::Object(self.payload.clone()).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A durably queued write. Immutable once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
  /// Insertion position; orders replay, never sent to the server
  pub sequence: i64,
  pub origin: String,
  pub session: Option<String>,
  pub digest: String,
  pub payload: Payload,
  pub enqueued_at: DateTime<Utc>,
}

impl MutationRecord {
  /// The item as sent to the ingest endpoint: the payload, stamped with the
  /// enqueue time unless the payload already carries its own `timestamp`.
  pub fn ingest_item(&self) -> Value {
    let mut item = self.payload.clone();
    item.entry("timestamp").or_insert_with(|| {
      Value::String(
        self
          .enqueued_at
          .to_rfc3339_opts(SecondsFormat::Millis, true),
      )
    });
    Value::Object(item)
  }
}
