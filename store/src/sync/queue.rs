//! The durable retry queue for remote writes.
//!
//! Entries are replayed in enqueue order. A failed replay bumps the entry's
//! retry counter; at [`MAX_SYNC_RETRIES`] the entry is dropped for good. The
//! queue is written through its [`QueueStore`] after every enqueue and every
//! replay pass. Persistence is best effort: a failed save is logged and the
//! in-memory queue stays authoritative.

use super::SyncAction;
use crate::adapter::StorageAdapter;
use crate::error::Result;
use async_trait::async_trait;
use folio_engine::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fixed storage key of the persisted queue.
pub const QUEUE_KEY: &str = "folio.sync-queue";

/// Failed replays after which an entry is dropped.
pub const MAX_SYNC_RETRIES: u32 = 5;

/// One undelivered write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Unique entry id (UUID v4)
    pub id: String,
    pub action: SyncAction,
    /// Milliseconds since the Unix epoch
    pub enqueued_at: Timestamp,
    /// Failed replay attempts so far
    pub retries: u32,
}

impl QueueEntry {
    pub fn new(action: SyncAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            enqueued_at: now_millis(),
            retries: 0,
        }
    }
}

fn now_millis() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entries replayed successfully and removed
    pub delivered: usize,
    /// Entries that failed and stay queued
    pub retried: usize,
    /// Entries that hit the retry limit and were removed
    pub dropped: usize,
}

/// Durable storage for the queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn load(&self) -> Result<Vec<QueueEntry>>;

    async fn save(&self, entries: &[QueueEntry]) -> Result<()>;
}

/// Queue persisted as a JSON list in `<dir>/folio.sync-queue.json`.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
    /// Serializes saves through the shared temporary file
    writes: Arc<tokio::sync::Mutex<()>>,
}

impl FileQueueStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{QUEUE_KEY}.json")),
            writes: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load(&self) -> Result<Vec<QueueEntry>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &[QueueEntry]) -> Result<()> {
        let bytes = serde_json::to_vec(entries)?;
        let _guard = self.writes.lock().await;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory queue store for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    saved: Mutex<Vec<QueueEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with entries, as if left by a previous run.
    pub fn with_entries(entries: Vec<QueueEntry>) -> Self {
        Self {
            saved: Mutex::new(entries),
        }
    }

    /// Last saved list.
    pub fn saved(&self) -> Vec<QueueEntry> {
        lock(&self.saved).clone()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.saved())
    }

    async fn save(&self, entries: &[QueueEntry]) -> Result<()> {
        *lock(&self.saved) = entries.to_vec();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered queue of undelivered writes.
pub struct SyncQueue {
    entries: Mutex<Vec<QueueEntry>>,
    store: Arc<dyn QueueStore>,
    /// Serializes replay passes
    pass: tokio::sync::Mutex<()>,
    /// Serializes saves; the saved snapshot is taken under it
    flush: tokio::sync::Mutex<()>,
}

impl SyncQueue {
    /// Empty queue persisted through `store`.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            store,
            pass: tokio::sync::Mutex::new(()),
            flush: tokio::sync::Mutex::new(()),
        }
    }

    /// Queue restored from `store`. An unreadable store yields an empty queue.
    pub async fn load(store: Arc<dyn QueueStore>) -> Self {
        let entries = match store.load().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load sync queue, starting empty");
                Vec::new()
            }
        };
        if !entries.is_empty() {
            tracing::info!(pending = entries.len(), "Restored sync queue");
        }
        Self {
            entries: Mutex::new(entries),
            store,
            pass: tokio::sync::Mutex::new(()),
            flush: tokio::sync::Mutex::new(()),
        }
    }

    /// Append an action and persist the queue.
    pub async fn enqueue(&self, action: SyncAction) -> QueueEntry {
        let entry = QueueEntry::new(action);
        lock(&self.entries).push(entry.clone());
        tracing::debug!(
            entry = %entry.id,
            action = entry.action.kind(),
            collection = entry.action.collection(),
            "Queued remote write"
        );
        self.persist().await;
        entry
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Current entries, in enqueue order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        lock(&self.entries).clone()
    }

    /// Replay every queued entry against `remote`.
    ///
    /// Works on a snapshot: entries enqueued while the pass runs are kept for
    /// the next pass. Concurrent calls run one after another.
    pub async fn replay(&self, remote: &dyn StorageAdapter) -> SyncReport {
        let _pass = self.pass.lock().await;
        let batch = self.snapshot();
        if batch.is_empty() {
            return SyncReport::default();
        }

        let mut report = SyncReport::default();
        let mut finished: HashSet<String> = HashSet::new();
        let mut retried: HashMap<String, u32> = HashMap::new();

        for entry in batch {
            match entry.action.replay(remote).await {
                Ok(()) => {
                    report.delivered += 1;
                    finished.insert(entry.id);
                }
                Err(e) => {
                    let retries = entry.retries + 1;
                    if retries >= MAX_SYNC_RETRIES {
                        tracing::warn!(
                            entry = %entry.id,
                            action = entry.action.kind(),
                            collection = entry.action.collection(),
                            retries,
                            error = %e,
                            "Dropping sync entry after too many failures"
                        );
                        report.dropped += 1;
                        finished.insert(entry.id);
                    } else {
                        tracing::debug!(
                            entry = %entry.id,
                            retries,
                            error = %e,
                            "Sync replay failed"
                        );
                        report.retried += 1;
                        retried.insert(entry.id, retries);
                    }
                }
            }
        }

        {
            let mut entries = lock(&self.entries);
            entries.retain(|e| !finished.contains(&e.id));
            for entry in entries.iter_mut() {
                if let Some(retries) = retried.get(&entry.id) {
                    entry.retries = *retries;
                }
            }
        }
        self.persist().await;

        tracing::info!(
            delivered = report.delivered,
            retried = report.retried,
            dropped = report.dropped,
            "Sync pass finished"
        );
        report
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        lock(&self.entries).clear();
        self.persist().await;
    }

    async fn persist(&self) {
        let _guard = self.flush.lock().await;
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(error = %e, pending = snapshot.len(), "Failed to persist sync queue");
        }
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}
