//! Key-value adapter.
//!
//! Collections live in memory as ordered record lists. When opened on a file
//! the whole map is written back after every mutation, so the file always
//! holds the latest committed state. A write whose file update fails is
//! reverted in memory as well.

use super::{apply_patch, ensure_id, report, ImportMode, ProgressFn, RecordPatch, StorageAdapter};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use folio_engine::{CollectionName, Record, RecordId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// In-memory map of collection to records, optionally file backed.
#[derive(Debug, Default)]
pub struct KeyValueAdapter {
    collections: DashMap<CollectionName, Vec<Record>>,
    path: Option<PathBuf>,
    /// Serializes mutations and file writes
    writes: Mutex<()>,
}

impl KeyValueAdapter {
    /// Adapter with no backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Adapter backed by `path`, loading its current contents if present.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stored: BTreeMap<CollectionName, Vec<Record>> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            path = %path.display(),
            collections = stored.len(),
            "Opened key-value store"
        );
        let collections = stored.into_iter().collect();

        Ok(Self {
            collections,
            path: Some(path),
            writes: Mutex::new(()),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Total records across collections.
    pub fn len(&self) -> usize {
        self.collections.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> BTreeMap<CollectionName, Vec<Record>> {
        self.collections
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Apply `mutate` to a copy of one collection, commit the copy and
    /// persist. Nothing changes when `mutate` fails. A failed persist
    /// restores the previous records of the collection.
    async fn commit<T, F>(&self, collection: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Record>) -> Result<Mutation<T>>,
    {
        let _guard = self.writes.lock().await;
        let previous = self.collections.get(collection).map(|records| records.clone());
        let mut next = previous.clone().unwrap_or_default();
        let value = match mutate(&mut next)? {
            Mutation::Changed(value) => value,
            Mutation::Unchanged(value) => return Ok(value),
        };
        self.collections.insert(collection.to_string(), next);

        if let Err(e) = self.write_file().await {
            match previous {
                Some(records) => {
                    self.collections.insert(collection.to_string(), records);
                }
                None => {
                    self.collections.remove(collection);
                }
            }
            tracing::warn!(
                collection = %collection,
                error = %e,
                "Failed to persist key-value store, write reverted"
            );
            return Err(e);
        }
        Ok(value)
    }

    /// Rewrite the backing file through a temporary file and a rename.
    /// Callers hold the write lock.
    async fn write_file(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(&self.snapshot())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn position(records: &[Record], id: &str) -> Option<usize> {
        records.iter().position(|r| r.id() == Some(id))
    }
}

/// Outcome of a staged collection mutation.
enum Mutation<T> {
    Changed(T),
    /// Nothing to write; the file is left alone
    Unchanged(T),
}

fn duplicate(collection: &str, id: &str) -> StoreError {
    StoreError::Constraint(format!("duplicate id '{}' in collection '{}'", id, collection))
}

/// Upsert `record` into `records` by id.
fn merge_into(records: &mut Vec<Record>, record: Record) -> Record {
    match record.id().and_then(|id| KeyValueAdapter::position(records, id)) {
        Some(index) => {
            let merged = apply_patch(records[index].clone(), &record);
            records[index] = merged.clone();
            merged
        }
        None => {
            records.push(record.clone());
            record
        }
    }
}

#[async_trait]
impl StorageAdapter for KeyValueAdapter {
    fn name(&self) -> &str {
        "key-value"
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        Ok(self.collections.get(collection).and_then(|records| {
            Self::position(&records, id).map(|i| records[i].clone())
        }))
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        Ok(self
            .collections
            .get(collection)
            .map(|records| records.clone())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<Record> {
        let record = ensure_id(record);
        self.commit(collection, |records| {
            if let Some(id) = record.id().filter(|id| Self::position(records, id).is_some()) {
                return Err(duplicate(collection, id));
            }
            records.push(record.clone());
            Ok(Mutation::Changed(record))
        })
        .await
    }

    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record> {
        self.commit(collection, |records| {
            let index = Self::position(records, id)
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            let updated = apply_patch(records[index].clone(), &patch);
            records[index] = updated.clone();
            Ok(Mutation::Changed(updated))
        })
        .await
    }

    async fn upsert(&self, collection: &str, record: Record) -> Result<Record> {
        let record = ensure_id(record);
        self.commit(collection, |records| {
            Ok(Mutation::Changed(merge_into(records, record)))
        })
        .await
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        self.commit(collection, |records| {
            Ok(match Self::position(records, id) {
                Some(index) => {
                    records.remove(index);
                    Mutation::Changed(true)
                }
                None => Mutation::Unchanged(false),
            })
        })
        .await
    }

    /// Validates the whole batch before anything is written and persists once.
    async fn bulk_insert(
        &self,
        collection: &str,
        records: Vec<Record>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let records: Vec<Record> = records.into_iter().map(ensure_id).collect();
        if records.is_empty() {
            return Ok(records);
        }
        let total = records.len();

        self.commit(collection, |stored| {
            let mut ids: HashSet<String> = stored
                .iter()
                .filter_map(|r| r.id().map(String::from))
                .collect();
            for (done, record) in records.iter().enumerate() {
                let id = record.id().unwrap_or_default();
                if !ids.insert(id.to_string()) {
                    return Err(duplicate(collection, id));
                }
                stored.push(record.clone());
                report(progress, done + 1, total);
            }
            Ok(Mutation::Changed(records))
        })
        .await
    }

    async fn bulk_update(
        &self,
        collection: &str,
        updates: Vec<RecordPatch>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        let total = updates.len();

        self.commit(collection, |stored| {
            let index: HashMap<String, usize> = stored
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.id().map(|id| (id.to_string(), i)))
                .collect();
            let mut updated = Vec::with_capacity(total);
            for RecordPatch { id, patch } in &updates {
                let i = *index
                    .get(id)
                    .ok_or_else(|| StoreError::not_found(collection, id))?;
                let record = apply_patch(stored[i].clone(), patch);
                stored[i] = record.clone();
                updated.push(record);
                report(progress, updated.len(), total);
            }
            Ok(Mutation::Changed(updated))
        })
        .await
    }

    async fn bulk_remove(
        &self,
        collection: &str,
        ids: Vec<RecordId>,
        progress: Option<&ProgressFn>,
    ) -> Result<usize> {
        let total = ids.len();
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();

        self.commit(collection, |stored| {
            let before = stored.len();
            stored.retain(|r| !r.id().map_or(false, |id| targets.contains(id)));
            let removed = before - stored.len();
            for done in 1..=total {
                report(progress, done, total);
            }
            Ok(if removed > 0 {
                Mutation::Changed(removed)
            } else {
                Mutation::Unchanged(0)
            })
        })
        .await
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.commit(collection, |records| {
            if records.is_empty() {
                return Ok(Mutation::Unchanged(()));
            }
            records.clear();
            Ok(Mutation::Changed(()))
        })
        .await
    }

    async fn import(
        &self,
        collection: &str,
        records: Vec<Record>,
        mode: ImportMode,
    ) -> Result<usize> {
        let count = records.len();
        self.commit(collection, |stored| {
            if mode == ImportMode::Replace {
                stored.clear();
            }
            for record in records.into_iter().map(ensure_id) {
                merge_into(stored, record);
            }
            Ok(Mutation::Changed(count))
        })
        .await
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        let mut names: Vec<_> = self
            .collections
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn destroy(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.collections.clear();
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
