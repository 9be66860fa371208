//! Replay of queued writes: the reconciler and the triggers that drive it.

mod reconciler;
mod trigger;

pub use reconciler::{FlushOutcome, PartialAckPolicy, Reconciler};
pub use trigger::{ConnectivityMonitor, SyncTrigger, TriggerHandler, WakeRegistry};
