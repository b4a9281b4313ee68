//! The store orchestrator.
//!
//! Owns the composite adapter, the schema registry and the event bus. Hands out
//! one cached [`Collection`] per name, runs schema migrations at open and on
//! import, moves the data to the larger backend once the selection policy asks
//! for it, and provides deferred-operation transactions.

use crate::adapter::{
    CompositeAdapter, ImportMode, KeyValueAdapter, SqliteAdapter, StorageAdapter,
};
use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::events::EventBus;
use crate::policy::{AdapterChoice, AdapterCounts, AdapterPolicy, ThresholdPolicy};
use crate::sync::{FileQueueStore, MemoryQueueStore, QueueStore, SyncQueue, SyncReport};
use dashmap::DashMap;
use folio_engine::{
    CollectionName, ExportBundle, MigrationEngine, Record, SchemaDefinition, SchemaRegistry,
    SchemaVersion,
};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Collection holding per-collection bookkeeping.
pub const META_COLLECTION: &str = "_meta";
/// Field of a meta record holding the applied schema version.
pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

/// Collections whose name starts with this are internal to the store.
const INTERNAL_PREFIX: &str = "_";

fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record counts and sync state of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Records per non-empty collection
    pub counts: BTreeMap<CollectionName, usize>,
    pub total: usize,
    /// Writes waiting for the remote
    pub pending: usize,
    /// Name of the current primary adapter
    pub adapter: String,
}

/// Builder for [`Store`].
#[derive(Default)]
pub struct StoreBuilder {
    registry: SchemaRegistry,
    registry_error: Option<folio_engine::Error>,
    primary: Option<Arc<dyn StorageAdapter>>,
    upgrade_target: Option<Arc<dyn StorageAdapter>>,
    remote: Option<Arc<dyn StorageAdapter>>,
    queue_store: Option<Arc<dyn QueueStore>>,
    policy: Option<Arc<dyn AdapterPolicy>>,
    events: Option<Arc<EventBus>>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `registry` for every schema, replacing schemas added so far.
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register one schema. A rejected schema fails [`StoreBuilder::open`].
    pub fn schema(mut self, schema: SchemaDefinition) -> Self {
        if let Err(e) = self.registry.register(schema) {
            self.registry_error.get_or_insert(e);
        }
        self
    }

    /// Local adapter the store starts on. Defaults to an in-memory key-value adapter.
    pub fn primary(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.primary = Some(adapter);
        self
    }

    /// Larger backend the store moves to when the policy asks for it.
    pub fn upgrade_target(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.upgrade_target = Some(adapter);
        self
    }

    /// Remote every write is mirrored to.
    pub fn remote(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.remote = Some(adapter);
        self
    }

    /// Persistence for the sync queue. Defaults to memory only.
    pub fn queue_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.queue_store = Some(store);
        self
    }

    /// Adapter selection policy. Defaults to [`ThresholdPolicy::default`].
    pub fn policy(mut self, policy: Arc<dyn AdapterPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Assemble the store, select its adapter and run pending migrations.
    pub async fn open(self) -> Result<Store> {
        if let Some(e) = self.registry_error {
            return Err(e.into());
        }

        let primary = self
            .primary
            .unwrap_or_else(|| Arc::new(KeyValueAdapter::in_memory()));
        let queue_store = self
            .queue_store
            .unwrap_or_else(|| Arc::new(MemoryQueueStore::new()));
        let queue = SyncQueue::load(queue_store).await;
        let adapter = Arc::new(CompositeAdapter::new(primary, self.remote, queue));

        let store = Store {
            registry: Arc::new(self.registry),
            adapter,
            upgrade_target: Mutex::new(self.upgrade_target),
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(ThresholdPolicy::default())),
            events: self.events.unwrap_or_else(EventBus::new_shared),
            collections: DashMap::new(),
            upgrade: tokio::sync::Mutex::new(()),
        };

        store.maybe_upgrade().await?;
        store.migrate_all().await?;

        tracing::info!(
            adapter = %store.adapter.primary_name(),
            schemas = store.registry.len(),
            remote = store.adapter.has_remote(),
            pending = store.adapter.pending().len(),
            "Store opened"
        );
        Ok(store)
    }
}

/// Offline-first record store.
pub struct Store {
    registry: Arc<SchemaRegistry>,
    adapter: Arc<CompositeAdapter>,
    upgrade_target: Mutex<Option<Arc<dyn StorageAdapter>>>,
    policy: Arc<dyn AdapterPolicy>,
    events: Arc<EventBus>,
    collections: DashMap<CollectionName, Arc<Collection>>,
    /// Serializes adapter upgrades
    upgrade: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("adapter", &self.adapter)
            .field("schemas", &self.registry.collections())
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Store laid out in `config.data_dir`: a key-value primary (file backed
    /// unless disabled), the SQLite database as upgrade target and a file
    /// backed sync queue.
    pub async fn from_config(config: &StoreConfig, registry: SchemaRegistry) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let primary = if config.persist_kv {
            KeyValueAdapter::open(config.kv_path()).await?
        } else {
            KeyValueAdapter::in_memory()
        };
        let target = SqliteAdapter::connect(&config.database_url).await?;

        StoreBuilder::new()
            .registry(registry)
            .primary(Arc::new(primary))
            .upgrade_target(Arc::new(target))
            .queue_store(Arc::new(FileQueueStore::new(&config.data_dir)))
            .policy(Arc::new(ThresholdPolicy::new(config.upgrade_threshold)))
            .open()
            .await
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The composite adapter every collection writes through.
    pub fn adapter(&self) -> &Arc<CompositeAdapter> {
        &self.adapter
    }

    /// Cached handle for a registered collection.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        if let Some(collection) = self.collections.get(name) {
            return Ok(collection.clone());
        }

        let adapter: Arc<dyn StorageAdapter> = self.adapter.clone();
        let collection = Arc::new(Collection::new(
            name,
            self.registry.clone(),
            adapter,
            self.events.clone(),
        )?);
        tracing::debug!(collection = %name, "Created collection handle");
        Ok(self
            .collections
            .entry(name.to_string())
            .or_insert(collection)
            .clone())
    }

    /// Run `f`, then execute the operations it enqueued, strictly in order.
    ///
    /// An error from `f` discards every operation. An error during commit
    /// discards the operations not yet executed; those already executed stay
    /// written.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = Transaction::new();
        let value = match f(tx.clone()).await {
            Ok(value) => value,
            Err(e) => {
                let discarded = tx.rollback();
                tracing::error!(error = %e, discarded, "Transaction rolled back");
                return Err(e);
            }
        };

        let operations = tx.take();
        let total = operations.len();
        for (executed, operation) in operations.into_iter().enumerate() {
            if let Err(e) = operation.await {
                tracing::error!(
                    error = %e,
                    executed,
                    discarded = total - executed - 1,
                    "Transaction commit failed, rolled back"
                );
                return Err(e);
            }
        }
        tracing::debug!(operations = total, "Transaction committed");
        Ok(value)
    }

    /// Dump every non-internal collection.
    pub async fn export_all(&self) -> Result<ExportBundle> {
        let mut bundle = ExportBundle::new();
        for name in self.adapter.collections().await? {
            if is_internal(&name) {
                continue;
            }
            let records = self.adapter.export(&name).await?;
            let version = self.registry.get(&name).map(|schema| schema.version);
            bundle.add_collection(name, records, version);
        }
        tracing::info!(
            collections = bundle.collections.len(),
            records = bundle.record_count(),
            "Exported store"
        );
        Ok(bundle)
    }

    /// Load a bundle; returns how many records were written.
    ///
    /// Schema-bound collections are migrated from the bundle's version and
    /// written through their collection, so they are validated. Collections
    /// without a schema are imported raw.
    pub async fn import_all(&self, bundle: ExportBundle, mode: ImportMode) -> Result<usize> {
        let bundle = bundle.upgrade()?;
        let engine = MigrationEngine::new(&self.registry);
        let mut total = 0;

        for (name, records) in bundle.collections {
            if is_internal(&name) {
                continue;
            }
            let written = match self.registry.get(&name) {
                Some(schema) => {
                    let from = bundle
                        .schema_versions
                        .get(&name)
                        .copied()
                        .unwrap_or(schema.version);
                    if from > schema.version {
                        return Err(folio_engine::Error::InvalidBundle(format!(
                            "'{}' was exported at schema version {}, newer than {}",
                            name, from, schema.version
                        ))
                        .into());
                    }
                    let migrated = engine.run(&name, &records, from, schema.version)?;
                    let written = self.collection(&name)?.import(migrated, mode).await?;
                    self.set_version(&name, schema.version).await?;
                    written
                }
                None => self.adapter.import(&name, records, mode).await?,
            };
            total += written;
        }

        tracing::info!(records = total, ?mode, "Imported bundle");
        self.maybe_upgrade().await?;
        Ok(total)
    }

    /// Insert `records` only when the collection is still empty.
    ///
    /// Returns how many records were inserted.
    pub async fn seed(&self, name: &str, records: Vec<Record>) -> Result<usize> {
        let collection = self.collection(name)?;
        if collection.count(&[]).await? > 0 {
            tracing::debug!(collection = %name, "Collection already populated, skipping seed");
            return Ok(0);
        }
        let inserted = collection.bulk_insert(records, None).await?.len();
        tracing::info!(collection = %name, records = inserted, "Seeded collection");
        self.maybe_upgrade().await?;
        Ok(inserted)
    }

    /// Clear every collection and destroy the backing storage.
    pub async fn reset(&self) -> Result<()> {
        let mut names = self.adapter.collections().await?;
        for name in self.registry.collections() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for name in &names {
            self.adapter.clear(name).await?;
        }
        self.adapter.destroy().await?;
        self.collections.clear();

        for name in self.registry.collections() {
            if let Some(schema) = self.registry.get(&name) {
                self.set_version(&name, schema.version).await?;
            }
        }
        tracing::info!(collections = names.len(), "Store reset");
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        let mut counts = BTreeMap::new();
        for name in self.adapter.collections().await? {
            if is_internal(&name) {
                continue;
            }
            let count = self.adapter.count(&name, &[]).await?;
            counts.insert(name, count);
        }
        Ok(StoreStats {
            total: counts.values().sum(),
            counts,
            pending: self.adapter.pending().len(),
            adapter: self.adapter.primary_name(),
        })
    }

    /// Replay queued writes against the remote.
    pub async fn sync(&self) -> SyncReport {
        self.adapter.sync().await
    }

    /// Ask the selection policy whether to move to the upgrade target.
    ///
    /// Returns whether the primary adapter changed.
    pub async fn maybe_upgrade(&self) -> Result<bool> {
        let _guard = self.upgrade.lock().await;

        let target = lock(&self.upgrade_target).clone();
        let primary = self.adapter.primary();
        let counts = AdapterCounts {
            primary: record_count(primary.as_ref()).await?,
            target: match &target {
                Some(target) => Some(record_count(target.as_ref()).await?),
                None => None,
            },
        };
        let choice = self.policy.choose(&counts);
        tracing::debug!(
            primary = primary.name(),
            records = counts.primary,
            target_records = ?counts.target,
            ?choice,
            "Adapter selection"
        );

        let Some(target) = target else {
            return Ok(false);
        };
        match choice {
            AdapterChoice::Primary => Ok(false),
            AdapterChoice::Upgrade => {
                let mut moved = 0;
                for name in primary.collections().await? {
                    let records = primary.export(&name).await?;
                    moved += target.import(&name, records, ImportMode::Replace).await?;
                }
                self.switch_primary(target);
                tracing::info!(
                    from = primary.name(),
                    to = %self.adapter.primary_name(),
                    records = moved,
                    "Upgraded storage adapter"
                );
                if let Err(e) = primary.destroy().await {
                    tracing::warn!(error = %e, "Failed to destroy previous adapter storage");
                }
                Ok(true)
            }
            AdapterChoice::Target => {
                self.switch_primary(target);
                tracing::info!(
                    from = primary.name(),
                    to = %self.adapter.primary_name(),
                    "Switched to populated storage adapter"
                );
                if let Err(e) = primary.destroy().await {
                    tracing::warn!(error = %e, "Failed to destroy previous adapter storage");
                }
                Ok(true)
            }
        }
    }

    fn switch_primary(&self, target: Arc<dyn StorageAdapter>) {
        self.adapter.swap_primary(target);
        *lock(&self.upgrade_target) = None;
    }

    /// Bring every registered collection to its schema version.
    ///
    /// A collection with records but no recorded version is at version 1.
    async fn migrate_all(&self) -> Result<()> {
        let engine = MigrationEngine::new(&self.registry);
        let primary = self.adapter.primary();

        for name in self.registry.collections() {
            let schema = self.registry.require(&name)?;
            let records = primary.get_all(&name).await?;
            let stored = self.stored_version(&name).await?;
            let from = match stored {
                Some(version) => version,
                None if records.is_empty() => schema.version,
                None => 1,
            };

            if from > schema.version {
                tracing::warn!(
                    collection = %name,
                    stored = from,
                    current = schema.version,
                    "Stored data is newer than its schema, leaving it untouched"
                );
                continue;
            }
            if from < schema.version {
                let pending = engine.pending(&name, from)?;
                let migrated = engine.run(&name, &records, from, schema.version)?;
                primary
                    .import(&name, migrated, ImportMode::Replace)
                    .await?;
                tracing::info!(
                    collection = %name,
                    from,
                    to = schema.version,
                    applied = ?pending,
                    records = records.len(),
                    "Migrated collection"
                );
            }
            if stored != Some(schema.version) {
                self.set_version(&name, schema.version).await?;
            }
        }
        Ok(())
    }

    async fn stored_version(&self, collection: &str) -> Result<Option<SchemaVersion>> {
        let meta = self
            .adapter
            .primary()
            .get(META_COLLECTION, collection)
            .await?;
        Ok(meta
            .as_ref()
            .and_then(|m| m.get(SCHEMA_VERSION_FIELD))
            .and_then(Value::as_u64)
            .and_then(|v| SchemaVersion::try_from(v).ok()))
    }

    async fn set_version(&self, collection: &str, version: SchemaVersion) -> Result<()> {
        let mut meta = Record::new().with_id(collection);
        meta.insert(SCHEMA_VERSION_FIELD, Value::from(version));
        self.adapter
            .primary()
            .upsert(META_COLLECTION, meta)
            .await?;
        Ok(())
    }
}

/// Records across every non-internal collection of an adapter.
async fn record_count(adapter: &dyn StorageAdapter) -> Result<usize> {
    let mut total = 0;
    for name in adapter.collections().await? {
        if !is_internal(&name) {
            total += adapter.count(&name, &[]).await?;
        }
    }
    Ok(total)
}

type DeferredOp = BoxFuture<'static, Result<()>>;

/// Ordered list of deferred operations, handed to [`Store::transaction`]
/// closures.
#[derive(Clone)]
pub struct Transaction {
    operations: Arc<Mutex<Option<Vec<DeferredOp>>>>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("operations", &self.len())
            .finish()
    }
}

impl Transaction {
    fn new() -> Self {
        Self {
            operations: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    /// Defer an operation until the transaction commits.
    ///
    /// Fails once the transaction has committed or rolled back.
    pub fn enqueue<Fut>(&self, operation: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match lock(&self.operations).as_mut() {
            Some(operations) => {
                operations.push(Box::pin(operation));
                Ok(())
            }
            None => Err(StoreError::Transaction(
                "transaction already finished".into(),
            )),
        }
    }

    /// Operations waiting to run.
    pub fn len(&self) -> usize {
        lock(&self.operations).as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self) -> Vec<DeferredOp> {
        lock(&self.operations).take().unwrap_or_default()
    }

    /// Discard every pending operation; returns how many were dropped.
    fn rollback(&self) -> usize {
        self.take().len()
    }
}
