//! Offline-first composite adapter.
//!
//! The primary (local) adapter is authoritative: reads only touch it and every
//! write lands there first. Successful writes are then mirrored to the remote
//! adapter; a remote failure never fails the call, the write is queued in the
//! [`SyncQueue`] instead and replayed by [`CompositeAdapter::sync`].

use super::{ensure_id, ImportMode, ProgressFn, RecordPatch, StorageAdapter};
use crate::error::Result;
use crate::sync::{QueueEntry, SyncAction, SyncQueue, SyncReport};
use async_trait::async_trait;
use folio_engine::{
    AggregateRow, AggregateSpec, CollectionName, QueryFilter, QuerySpec, Record, RecordId,
};
use std::sync::{Arc, PoisonError, RwLock};

pub struct CompositeAdapter {
    primary: RwLock<Arc<dyn StorageAdapter>>,
    remote: Option<Arc<dyn StorageAdapter>>,
    queue: SyncQueue,
}

impl CompositeAdapter {
    pub fn new(
        primary: Arc<dyn StorageAdapter>,
        remote: Option<Arc<dyn StorageAdapter>>,
        queue: SyncQueue,
    ) -> Self {
        Self {
            primary: RwLock::new(primary),
            remote,
            queue,
        }
    }

    /// The current primary adapter.
    pub fn primary(&self) -> Arc<dyn StorageAdapter> {
        self.primary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn primary_name(&self) -> String {
        self.primary().name().to_string()
    }

    /// Replace the primary adapter, returning the previous one.
    pub fn swap_primary(&self, next: Arc<dyn StorageAdapter>) -> Arc<dyn StorageAdapter> {
        let mut primary = self.primary.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = primary.name(), to = next.name(), "Swapping primary adapter");
        std::mem::replace(&mut *primary, next)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Queued writes not yet delivered to the remote.
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.queue.snapshot()
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Replay queued writes against the remote, if one is configured.
    pub async fn sync(&self) -> SyncReport {
        match &self.remote {
            Some(remote) => self.queue.replay(remote.as_ref()).await,
            None => SyncReport::default(),
        }
    }

    async fn mirror(&self, action: SyncAction) {
        let Some(remote) = &self.remote else {
            return;
        };
        if let Err(e) = action.replay(remote.as_ref()).await {
            tracing::warn!(
                remote = remote.name(),
                action = action.kind(),
                collection = action.collection(),
                error = %e,
                "Remote write failed, queued for sync"
            );
            self.queue.enqueue(action).await;
        }
    }
}

impl std::fmt::Debug for CompositeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeAdapter")
            .field("primary", &self.primary_name())
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("queue", &self.queue)
            .finish()
    }
}

#[async_trait]
impl StorageAdapter for CompositeAdapter {
    fn name(&self) -> &str {
        "composite"
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.primary().get(collection, id).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        self.primary().get_all(collection).await
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<Record> {
        let stored = self.primary().insert(collection, record).await?;
        self.mirror(SyncAction::Insert {
            collection: collection.to_string(),
            record: stored.clone(),
        })
        .await;
        Ok(stored)
    }

    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record> {
        let updated = self.primary().update(collection, id, patch.clone()).await?;
        self.mirror(SyncAction::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        })
        .await;
        Ok(updated)
    }

    async fn upsert(&self, collection: &str, record: Record) -> Result<Record> {
        let stored = self.primary().upsert(collection, ensure_id(record)).await?;
        self.mirror(SyncAction::Upsert {
            collection: collection.to_string(),
            record: stored.clone(),
        })
        .await;
        Ok(stored)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = self.primary().remove(collection, id).await?;
        if removed {
            self.mirror(SyncAction::Remove {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await;
        }
        Ok(removed)
    }

    async fn query(&self, collection: &str, spec: &QuerySpec) -> Result<Vec<Record>> {
        self.primary().query(collection, spec).await
    }

    async fn count(&self, collection: &str, filters: &[QueryFilter]) -> Result<usize> {
        self.primary().count(collection, filters).await
    }

    async fn bulk_insert(
        &self,
        collection: &str,
        records: Vec<Record>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let stored = self
            .primary()
            .bulk_insert(collection, records, progress)
            .await?;
        self.mirror(SyncAction::BulkInsert {
            collection: collection.to_string(),
            records: stored.clone(),
        })
        .await;
        Ok(stored)
    }

    async fn bulk_update(
        &self,
        collection: &str,
        updates: Vec<RecordPatch>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let updated = self
            .primary()
            .bulk_update(collection, updates.clone(), progress)
            .await?;
        self.mirror(SyncAction::BulkUpdate {
            collection: collection.to_string(),
            updates,
        })
        .await;
        Ok(updated)
    }

    async fn bulk_remove(
        &self,
        collection: &str,
        ids: Vec<RecordId>,
        progress: Option<&ProgressFn>,
    ) -> Result<usize> {
        let removed = self
            .primary()
            .bulk_remove(collection, ids.clone(), progress)
            .await?;
        if removed > 0 {
            self.mirror(SyncAction::BulkRemove {
                collection: collection.to_string(),
                ids,
            })
            .await;
        }
        Ok(removed)
    }

    async fn aggregate(&self, collection: &str, spec: &AggregateSpec) -> Result<Vec<AggregateRow>> {
        self.primary().aggregate(collection, spec).await
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.primary().clear(collection).await?;
        self.mirror(SyncAction::Clear {
            collection: collection.to_string(),
        })
        .await;
        Ok(())
    }

    async fn export(&self, collection: &str) -> Result<Vec<Record>> {
        self.primary().export(collection).await
    }

    async fn import(
        &self,
        collection: &str,
        records: Vec<Record>,
        mode: ImportMode,
    ) -> Result<usize> {
        // Ids are fixed here so the primary and the remote agree on them.
        let records: Vec<Record> = records.into_iter().map(ensure_id).collect();
        let written = self
            .primary()
            .import(collection, records.clone(), mode)
            .await?;
        self.mirror(SyncAction::ImportCollection {
            collection: collection.to_string(),
            records,
            mode,
        })
        .await;
        Ok(written)
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        self.primary().collections().await
    }

    /// Destroys the local storage only; the remote keeps its data.
    async fn destroy(&self) -> Result<()> {
        self.primary().destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::KeyValueAdapter;
    use crate::error::StoreError;
    use crate::sync::MemoryQueueStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Remote that refuses every write while offline.
    #[derive(Default)]
    struct FlakyRemote {
        inner: KeyValueAdapter,
        offline: AtomicBool,
    }

    impl FlakyRemote {
        fn check(&self) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("remote offline".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl StorageAdapter for FlakyRemote {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn get(&self, c: &str, id: &str) -> Result<Option<Record>> {
            self.inner.get(c, id).await
        }
        async fn get_all(&self, c: &str) -> Result<Vec<Record>> {
            self.inner.get_all(c).await
        }
        async fn insert(&self, c: &str, r: Record) -> Result<Record> {
            self.check()?;
            self.inner.insert(c, r).await
        }
        async fn update(&self, c: &str, id: &str, p: Record) -> Result<Record> {
            self.check()?;
            self.inner.update(c, id, p).await
        }
        async fn upsert(&self, c: &str, r: Record) -> Result<Record> {
            self.check()?;
            self.inner.upsert(c, r).await
        }
        async fn remove(&self, c: &str, id: &str) -> Result<bool> {
            self.check()?;
            self.inner.remove(c, id).await
        }
        async fn clear(&self, c: &str) -> Result<()> {
            self.check()?;
            self.inner.clear(c).await
        }
        async fn import(&self, c: &str, r: Vec<Record>, m: ImportMode) -> Result<usize> {
            self.check()?;
            self.inner.import(c, r, m).await
        }
        async fn collections(&self) -> Result<Vec<CollectionName>> {
            self.inner.collections().await
        }
        async fn destroy(&self) -> Result<()> {
            self.inner.destroy().await
        }
    }

    fn composite(remote: Option<Arc<dyn StorageAdapter>>) -> CompositeAdapter {
        CompositeAdapter::new(
            Arc::new(KeyValueAdapter::in_memory()),
            remote,
            SyncQueue::new(Arc::new(MemoryQueueStore::new())),
        )
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn writes_mirror_to_online_remote() {
        let remote = Arc::new(FlakyRemote::default());
        let adapter = composite(Some(remote.clone()));

        let stored = adapter.insert("c", record(json!({"n": 1}))).await.unwrap();
        let id = stored.id().unwrap();
        assert_eq!(remote.get("c", id).await.unwrap(), Some(stored.clone()));
        assert!(adapter.pending().is_empty());
    }

    #[tokio::test]
    async fn offline_writes_queue_and_sync_later() {
        let remote = Arc::new(FlakyRemote::default());
        remote.offline.store(true, Ordering::SeqCst);
        let adapter = composite(Some(remote.clone()));

        adapter.insert("c", record(json!({"id": "a"}))).await.unwrap();
        adapter
            .update("c", "a", record(json!({"n": 2})))
            .await
            .unwrap();
        assert!(!adapter.remove("c", "missing").await.unwrap());

        let pending = adapter.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].action.kind(), "insert");
        assert_eq!(pending[1].action.kind(), "update");
        assert_eq!(adapter.get("c", "a").await.unwrap().unwrap().get("n"), Some(&json!(2)));

        remote.offline.store(false, Ordering::SeqCst);
        let report = adapter.sync().await;
        assert_eq!(report.delivered, 2);
        assert!(adapter.pending().is_empty());
        assert_eq!(
            remote.get("c", "a").await.unwrap(),
            adapter.get("c", "a").await.unwrap()
        );
    }

    #[tokio::test]
    async fn primary_failure_is_not_mirrored() {
        let remote = Arc::new(FlakyRemote::default());
        let adapter = composite(Some(remote.clone()));
        let err = adapter
            .update("c", "nope", Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(adapter.pending().is_empty());
    }

    #[tokio::test]
    async fn import_agrees_on_ids() {
        let remote = Arc::new(FlakyRemote::default());
        let adapter = composite(Some(remote.clone()));
        adapter
            .import("c", vec![record(json!({"n": 1}))], ImportMode::Replace)
            .await
            .unwrap();
        assert_eq!(adapter.get_all("c").await.unwrap(), remote.get_all("c").await.unwrap());
    }

    #[tokio::test]
    async fn swap_primary_redirects_reads() {
        let adapter = composite(None);
        adapter.insert("c", record(json!({"id": "a"}))).await.unwrap();

        let next = Arc::new(KeyValueAdapter::in_memory());
        let old = adapter.swap_primary(next);
        assert_eq!(old.get_all("c").await.unwrap().len(), 1);
        assert!(adapter.get_all("c").await.unwrap().is_empty());
        assert!(!adapter.has_remote());
        assert_eq!(adapter.sync().await, SyncReport::default());
    }
}
