//! The storage adapter contract and its implementations.
//!
//! Every backend implements [`StorageAdapter`]. The Store only ever talks to
//! `Arc<dyn StorageAdapter>`, so backends can be swapped at runtime.
//!
//! - [`KeyValueAdapter`] - in-memory map, optionally backed by a JSON file
//! - [`SqliteAdapter`] - embedded SQLite database
//! - [`CompositeAdapter`] - offline-first wrapper over a primary and a remote

mod composite;
mod kv;
mod sqlite;

pub use composite::CompositeAdapter;
pub use kv::KeyValueAdapter;
pub use sqlite::SqliteAdapter;

use crate::error::Result;
use async_trait::async_trait;
use folio_engine::{
    aggregate, evaluate, query::matches_all, AggregateRow, AggregateSpec, CollectionName,
    QueryFilter, QuerySpec, Record, RecordId,
};
use serde::{Deserialize, Serialize};

/// Progress callback for bulk operations: `(done, total)`.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// How `import` treats records already in the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Upsert imported records, keep the rest
    #[default]
    Merge,
    /// Drop the collection's records first
    Replace,
}

/// One entry of a bulk update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub id: RecordId,
    pub patch: Record,
}

impl RecordPatch {
    pub fn new(id: impl Into<RecordId>, patch: Record) -> Self {
        Self {
            id: id.into(),
            patch,
        }
    }
}

/// Uniform storage contract.
///
/// Failures are [`crate::StoreError`] values of a storage kind; absence is
/// `Ok(None)` or `Ok(false)`, never a sentinel record. Adapters never retain
/// references to caller data beyond a call.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Backend label used in logs and stats.
    fn name(&self) -> &str;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    /// Every record of a collection, in insertion order.
    async fn get_all(&self, collection: &str) -> Result<Vec<Record>>;

    /// Insert a new record and return it as stored.
    ///
    /// A record without an id gets a generated one. An existing id is a
    /// constraint violation.
    async fn insert(&self, collection: &str, record: Record) -> Result<Record>;

    /// Shallow-merge `patch` into the stored record and return the result.
    ///
    /// The id cannot change. A missing record is a not-found error.
    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record>;

    /// Insert when absent, merge when present.
    async fn upsert(&self, collection: &str, record: Record) -> Result<Record>;

    /// Remove a record; `Ok(false)` when there was nothing to remove.
    async fn remove(&self, collection: &str, id: &str) -> Result<bool>;

    async fn query(&self, collection: &str, spec: &QuerySpec) -> Result<Vec<Record>> {
        Ok(evaluate(self.get_all(collection).await?, spec))
    }

    async fn count(&self, collection: &str, filters: &[QueryFilter]) -> Result<usize> {
        let records = self.get_all(collection).await?;
        Ok(records.iter().filter(|r| matches_all(r, filters)).count())
    }

    async fn bulk_insert(
        &self,
        collection: &str,
        records: Vec<Record>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let total = records.len();
        let mut stored = Vec::with_capacity(total);
        for record in records {
            stored.push(self.insert(collection, record).await?);
            report(progress, stored.len(), total);
        }
        Ok(stored)
    }

    async fn bulk_update(
        &self,
        collection: &str,
        updates: Vec<RecordPatch>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let total = updates.len();
        let mut updated = Vec::with_capacity(total);
        for RecordPatch { id, patch } in updates {
            updated.push(self.update(collection, &id, patch).await?);
            report(progress, updated.len(), total);
        }
        Ok(updated)
    }

    /// Remove many records; returns how many existed.
    async fn bulk_remove(
        &self,
        collection: &str,
        ids: Vec<RecordId>,
        progress: Option<&ProgressFn>,
    ) -> Result<usize> {
        let total = ids.len();
        let mut removed = 0;
        for (done, id) in ids.iter().enumerate() {
            if self.remove(collection, id).await? {
                removed += 1;
            }
            report(progress, done + 1, total);
        }
        Ok(removed)
    }

    async fn aggregate(&self, collection: &str, spec: &AggregateSpec) -> Result<Vec<AggregateRow>> {
        Ok(aggregate(&self.get_all(collection).await?, spec))
    }

    async fn clear(&self, collection: &str) -> Result<()>;

    async fn export(&self, collection: &str) -> Result<Vec<Record>> {
        self.get_all(collection).await
    }

    /// Load records into a collection; returns how many were written.
    async fn import(&self, collection: &str, records: Vec<Record>, mode: ImportMode)
        -> Result<usize>;

    /// Names of collections holding at least one record, sorted.
    async fn collections(&self) -> Result<Vec<CollectionName>>;

    /// Drop every collection and the raw backing storage.
    async fn destroy(&self) -> Result<()>;
}

/// Invoke an optional progress callback.
pub(crate) fn report(progress: Option<&ProgressFn>, done: usize, total: usize) {
    if let Some(progress) = progress {
        progress(done, total);
    }
}

/// Give a record a generated id when it has none.
pub(crate) fn ensure_id(mut record: Record) -> Record {
    if record.id().map_or(true, str::is_empty) {
        record.set_id(uuid::Uuid::new_v4().to_string());
    }
    record
}

/// Apply a patch to a stored record. The stored id always wins.
pub(crate) fn apply_patch(mut stored: Record, patch: &Record) -> Record {
    stored.merge(patch);
    stored
}
