use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::queue::QueueStore;
use crate::transport::{Request, Transport};

use super::reconciler::{FlushError, FlushOutcome, Reconciler};

/// Reasons to attempt a flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// The server became reachable again
  ConnectivityRestored,
  /// The host fired a registered background wake signal
  Wake(String),
  /// The application started or came to the foreground
  Foreground,
}

/// Event channel feeding the sync loop.
pub struct TriggerHandler {
  tx: mpsc::UnboundedSender<SyncEvent>,
  rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl TriggerHandler {
  /// Create a handler with a startup flush already queued.
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    // Catch any backlog left while background wakes were unavailable
    let _ = tx.send(SyncEvent::Foreground);
    Self { tx, rx }
  }

  /// A sender for additional activation sources
  pub fn sender(&self) -> mpsc::UnboundedSender<SyncEvent> {
    self.tx.clone()
  }

  /// Stop handing out senders. The channel closes once every sender
  /// obtained so far has been dropped.
  pub fn into_receiver(self) -> mpsc::UnboundedReceiver<SyncEvent> {
    self.rx
  }
}

impl Default for TriggerHandler {
  fn default() -> Self {
    Self::new()
  }
}

/// Named wake signals the host environment may fire.
///
/// The core only registers interest; when a signal fires is up to the host.
#[derive(Clone, Default)]
pub struct WakeRegistry {
  handlers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SyncEvent>>>>,
}

impl WakeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, tag: impl Into<String>, tx: mpsc::UnboundedSender<SyncEvent>) {
    let tag = tag.into();
    debug!(%tag, "wake signal registered");
    if let Ok(mut handlers) = self.handlers.lock() {
      handlers.insert(tag, tx);
    }
  }

  /// Fire `tag`. Returns false if nothing is registered under it.
  pub fn wake(&self, tag: &str) -> bool {
    let Ok(handlers) = self.handlers.lock() else {
      return false;
    };
    match handlers.get(tag) {
      Some(tx) => tx.send(SyncEvent::Wake(tag.to_string())).is_ok(),
      None => {
        debug!(%tag, "ignoring unregistered wake signal");
        false
      }
    }
  }

  /// Fire `tag` every `period`, standing in for a host background scheduler.
  pub fn schedule(&self, tag: impl Into<String>, period: Duration) -> JoinHandle<()> {
    let registry = self.clone();
    let tag = tag.into();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      // The first tick completes immediately; startup already flushes
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if !registry.wake(&tag) {
          break;
        }
      }
    })
  }
}

/// Online/offline edge detector
#[derive(Debug, Default)]
struct LinkState {
  online: Option<bool>,
}

impl LinkState {
  /// Record a probe result. Returns true on an offline→online transition.
  fn observe(&mut self, online: bool) -> bool {
    let restored = online && self.online == Some(false);
    if !online && self.online != Some(false) {
      info!("server unreachable, working offline");
    }
    self.online = Some(online);
    restored
  }
}

/// Probes the server periodically and reports regained connectivity.
pub struct ConnectivityMonitor<T: Transport> {
  transport: Arc<T>,
  probe: Request,
  interval: Duration,
}

impl<T: Transport> ConnectivityMonitor<T> {
  pub fn new(transport: Arc<T>, probe_path: impl Into<String>, interval: Duration) -> Self {
    Self {
      transport,
      probe: Request::get(probe_path.into()),
      interval,
    }
  }

  /// Any response, whatever its status, counts as online.
  pub fn spawn(self, tx: mpsc::UnboundedSender<SyncEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      let mut link = LinkState::default();
      loop {
        ticker.tick().await;
        let online = self.transport.send(&self.probe).await.is_ok();
        if link.observe(online) {
          info!("connectivity restored");
          if tx.send(SyncEvent::ConnectivityRestored).is_err() {
            break;
          }
        }
      }
    })
  }
}

/// Runs a flush for every activation event.
pub struct SyncTrigger<T: Transport, Q: QueueStore> {
  reconciler: Reconciler<T, Q>,
  events: mpsc::UnboundedReceiver<SyncEvent>,
}

impl<T: Transport, Q: QueueStore> SyncTrigger<T, Q> {
  /// Register every activation source with `events` before calling this.
  pub fn new(reconciler: Reconciler<T, Q>, events: TriggerHandler) -> Self {
    Self {
      reconciler,
      events: events.into_receiver(),
    }
  }

  /// Process events until `shutdown` resolves or every activation source
  /// is gone.
  ///
  /// Events are handled one at a time; a flush in progress always completes
  /// before shutdown is observed.
  pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    loop {
      tokio::select! {
        _ = &mut shutdown => {
          info!("sync trigger stopping");
          break;
        }
        event = self.events.recv() => match event {
          Some(event) => {
            self.handle(event).await;
          }
          None => {
            info!("no activation sources left, sync trigger stopping");
            break;
          }
        },
      }
    }
  }

  async fn handle(&self, event: SyncEvent) -> Option<FlushOutcome> {
    let span = info_span!("flush", trigger = ?event);
    async {
      match self.reconciler.flush().await {
        Ok(outcome) => {
          debug!(?outcome, "flush finished");
          Some(outcome)
        }
        Err(FlushError::Transport(e)) => {
          debug!(error = %e, "flush deferred until next trigger");
          None
        }
        Err(FlushError::Acknowledgement(e)) => {
          warn!(error = %e, "flush not acknowledged");
          None
        }
        Err(e) => {
          error!(error = %e, "flush failed");
          None
        }
      }
    }
    .instrument(span)
    .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::queue::{NewMutation, SqliteQueue};
  use crate::sync::PartialAckPolicy;
  use crate::testing::{payload, FakeServer};
  use serde_json::json;

  fn setup() -> (Arc<FakeServer>, Arc<SqliteQueue>, Reconciler<FakeServer, SqliteQueue>) {
    let server = Arc::new(FakeServer::new());
    let queue = Arc::new(SqliteQueue::new(Database::open_in_memory().unwrap()));
    let reconciler = Reconciler::new(
      server.clone(),
      queue.clone(),
      "/api/sync",
      PartialAckPolicy::ClearBatch,
    );
    (server, queue, reconciler)
  }

  fn review(question_id: u64) -> NewMutation {
    NewMutation::new(
      "/api/review",
      None,
      payload(json!({"question_id": question_id, "quality": 4})),
    )
  }

  #[test]
  fn test_link_state_reports_only_restoration() {
    let mut link = LinkState::default();
    assert!(!link.observe(true));
    assert!(!link.observe(true));
    assert!(!link.observe(false));
    assert!(!link.observe(false));
    assert!(link.observe(true));
    assert!(!link.observe(true));
  }

  #[test]
  fn test_first_probe_offline_then_online() {
    let mut link = LinkState::default();
    assert!(!link.observe(false));
    assert!(link.observe(true));
  }

  #[tokio::test]
  async fn test_handler_starts_with_foreground() {
    let mut events = TriggerHandler::new().into_receiver();
    assert_eq!(events.recv().await, Some(SyncEvent::Foreground));
    assert_eq!(events.recv().await, None);
  }

  #[tokio::test]
  async fn test_wake_registry() {
    let events = TriggerHandler::new();
    let registry = WakeRegistry::new();
    registry.register("quiz-sync", events.sender());
    let mut events = events.into_receiver();

    assert!(registry.wake("quiz-sync"));
    assert!(!registry.wake("other-tag"));

    assert_eq!(events.recv().await, Some(SyncEvent::Foreground));
    assert_eq!(
      events.recv().await,
      Some(SyncEvent::Wake("quiz-sync".to_string()))
    );
  }

  #[tokio::test]
  async fn test_monitor_emits_on_restore() {
    let server = Arc::new(FakeServer::new());
    server.set_offline(true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = ConnectivityMonitor::new(server.clone(), "/", Duration::from_millis(10)).spawn(tx);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    server.set_offline(false);
    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
      .await
      .unwrap();
    assert_eq!(event, Some(SyncEvent::ConnectivityRestored));
    handle.abort();
  }

  #[tokio::test]
  async fn test_startup_flush_drains_backlog() {
    let (server, queue, reconciler) = setup();
    queue.append(review(1)).await.unwrap();
    queue.append(review(2)).await.unwrap();

    let trigger = SyncTrigger::new(reconciler, TriggerHandler::new());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(trigger.run(async {
      let _ = stop_rx.await;
    }));

    for _ in 0..100 {
      if queue.len().await.unwrap() == 0 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let _ = stop_tx.send(());
    running.await.unwrap();

    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(server.applied().len(), 2);
  }

  #[tokio::test]
  async fn test_run_ends_when_sources_are_gone() {
    let (server, queue, reconciler) = setup();
    queue.append(review(3)).await.unwrap();

    let events = TriggerHandler::new();
    let wake = events.sender();
    let trigger = SyncTrigger::new(reconciler, events);
    drop(wake);

    tokio::time::timeout(Duration::from_secs(2), trigger.run(std::future::pending()))
      .await
      .unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(server.applied().len(), 1);
  }

  #[tokio::test]
  async fn test_wake_after_offline_backlog() {
    let (server, queue, reconciler) = setup();
    server.set_offline(true);
    queue.append(review(7)).await.unwrap();

    let mut trigger = SyncTrigger::new(reconciler, TriggerHandler::new());

    // Startup flush fails at the transport; the queue is kept
    let event = trigger.events.recv().await.unwrap();
    assert_eq!(trigger.handle(event).await, None);
    assert_eq!(queue.len().await.unwrap(), 1);

    server.set_offline(false);
    let outcome = trigger.handle(SyncEvent::Wake("quiz-sync".into())).await;
    assert!(matches!(outcome, Some(FlushOutcome::Synced { sent: 1, .. })));
    assert_eq!(queue.len().await.unwrap(), 0);

    // Overlapping triggers on an empty queue are no-ops
    let outcome = trigger.handle(SyncEvent::ConnectivityRestored).await;
    assert_eq!(outcome, Some(FlushOutcome::Empty));
  }
}
