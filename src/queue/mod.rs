//! Durable queue of writes that could not be delivered.
//!
//! Append-only between flushes. Records are removed only by the sync
//! reconciler once the server has acknowledged the batch covering them.

mod record;
mod storage;

pub use record::{MutationRecord, NewMutation};
pub use storage::{Batch, QueueStore, SqliteQueue};
