use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::StoreError;
use crate::queue::{Batch, MutationRecord, QueueStore};
use crate::transport::{to_payload, Request, Transport, TransportError};

/// What to do when the server acknowledges fewer items than were sent.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PartialAckPolicy {
  /// Treat the server as authoritative and clear the whole batch
  #[default]
  ClearBatch,
  /// Keep the batch and resend it on the next flush
  RetainBatch,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
  /// Nothing was pending; no request was made
  Empty,
  /// The batch reached the server
  Synced {
    sent: usize,
    accepted: usize,
    cleared: bool,
  },
  /// The server answered with an error status; the queue is untouched
  Rejected { status: u16 },
}

#[derive(Debug, Error)]
pub enum FlushError {
  /// Queue untouched; retried on the next trigger
  #[error("ingest endpoint unreachable: {0}")]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Store(#[from] StoreError),

  /// Queue untouched
  #[error("unreadable ingest acknowledgement: {0}")]
  Acknowledgement(String),
}

#[derive(Serialize)]
struct IngestBatch {
  items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct IngestAck {
  synced: usize,
  #[serde(default)]
  total: Option<usize>,
}

/// Drains the durable queue to the server's batch ingest endpoint.
pub struct Reconciler<T: Transport, Q: QueueStore> {
  transport: Arc<T>,
  queue: Arc<Q>,
  ingest_path: String,
  partial_ack: PartialAckPolicy,
}

impl<T: Transport, Q: QueueStore> Reconciler<T, Q> {
  pub fn new(
    transport: Arc<T>,
    queue: Arc<Q>,
    ingest_path: impl Into<String>,
    partial_ack: PartialAckPolicy,
  ) -> Self {
    Self {
      transport,
      queue,
      ingest_path: ingest_path.into(),
      partial_ack,
    }
  }

  /// Deliver every pending record in one batch.
  ///
  /// Safe to call concurrently from several contexts: only records covered
  /// by the batch are removed, and resubmitting a fact the server already
  /// applied has no further effect. Unreadable rows inside the batch range
  /// are removed along with it.
  pub async fn flush(&self) -> Result<FlushOutcome, FlushError> {
    let Batch { records, through } = self.queue.read_batch().await?;
    let Some(last) = through else {
      debug!("nothing to flush");
      return Ok(FlushOutcome::Empty);
    };
    if records.is_empty() {
      let dropped = self.queue.clear_through(last).await?;
      warn!(dropped, "discarded unreadable queued writes");
      return Ok(FlushOutcome::Empty);
    }
    let sent = records.len();

    let batch = IngestBatch {
      items: records.iter().map(MutationRecord::ingest_item).collect(),
    };
    // IngestBatch is a struct, so it always becomes an object
    let body = to_payload(&batch).unwrap_or_default();

    let response = match self
      .transport
      .send(&Request::post(self.ingest_path.as_str(), body))
      .await
    {
      Ok(response) => response,
      Err(e) => {
        warn!(error = %e, pending = sent, "flush deferred, server unreachable");
        return Err(e.into());
      }
    };

    if !response.is_success() {
      warn!(status = response.status, pending = sent, "ingest endpoint rejected batch");
      return Ok(FlushOutcome::Rejected {
        status: response.status,
      });
    }

    let ack: IngestAck = response
      .json()
      .map_err(|e| FlushError::Acknowledgement(e.to_string()))?;
    let accepted = ack.synced;

    let cleared = accepted >= sent || self.partial_ack == PartialAckPolicy::ClearBatch;
    if cleared {
      self.queue.clear_through(last).await?;
      info!(sent, accepted, total = ?ack.total, "pending writes synced");
    } else {
      warn!(sent, accepted, "partial acknowledgement, keeping batch for retry");
    }

    Ok(FlushOutcome::Synced {
      sent,
      accepted,
      cleared,
    })
  }
}

impl<T: Transport, Q: QueueStore> Clone for Reconciler<T, Q> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      queue: Arc::clone(&self.queue),
      ingest_path: self.ingest_path.clone(),
      partial_ack: self.partial_ack,
    }
  }
}
