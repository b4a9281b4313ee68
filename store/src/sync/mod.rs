//! Offline write propagation: replayable actions and the durable retry queue.

mod action;
mod queue;

pub use action::SyncAction;
pub use queue::{
    FileQueueStore, MemoryQueueStore, QueueEntry, QueueStore, SyncQueue, SyncReport,
    MAX_SYNC_RETRIES, QUEUE_KEY,
};
