//! Schema-bound collection handles.
//!
//! A [`Collection`] is the write path every business module goes through:
//! it fills computed fields and timestamps, validates against the schema,
//! checks unique indexes and relation policies, writes through the adapter
//! and emits a [`StoreEvent`] per written record.

use crate::adapter::{ensure_id, ImportMode, ProgressFn, RecordPatch, StorageAdapter};
use crate::error::{Result, StoreError};
use crate::events::{EventBus, EventKind, StoreEvent};
use folio_engine::{
    validate_record, AggregateRow, AggregateSpec, CascadePolicy, CollectionName, FilterOperator,
    QueryFilter, QuerySpec, Record, RecordId, SchemaDefinition, SchemaRegistry, SortDirection,
    SortKey,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Field stamped with the creation time when the schema declares it.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Field stamped with the last write time when the schema declares it.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Handle to one schema-bound collection.
#[derive(Clone)]
pub struct Collection {
    name: CollectionName,
    schema: Arc<SchemaDefinition>,
    registry: Arc<SchemaRegistry>,
    adapter: Arc<dyn StorageAdapter>,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("version", &self.schema.version)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

/// Records touched by a removal, computed before anything is written.
#[derive(Debug, Default)]
struct RemovalPlan {
    /// Records to remove, roots first
    removals: Vec<Removal>,
    /// Dependents whose foreign key is set to null: (collection, id, field)
    nullify: Vec<(CollectionName, RecordId, String)>,
}

#[derive(Debug)]
struct Removal {
    collection: CollectionName,
    record: Record,
    /// Requested by the caller rather than reached through a cascade
    root: bool,
}

impl Collection {
    /// Bind a collection. Fails when no schema is registered for `name`.
    pub fn new(
        name: impl Into<CollectionName>,
        registry: Arc<SchemaRegistry>,
        adapter: Arc<dyn StorageAdapter>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let name = name.into();
        let schema = registry.require(&name)?;
        Ok(Self {
            name,
            schema,
            registry,
            adapter,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        self.adapter.get(&self.name, id).await
    }

    /// Like [`Collection::get`], but absence is a not-found error.
    pub async fn require(&self, id: &str) -> Result<Record> {
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::not_found(&self.name, id))
    }

    pub async fn get_all(&self) -> Result<Vec<Record>> {
        self.adapter.get_all(&self.name).await
    }

    pub async fn insert(&self, record: Record) -> Result<Record> {
        let prepared = self.prepare_insert(record);
        self.check(&prepared)?;
        self.check_unique(std::slice::from_ref(&prepared)).await?;

        let stored = self.adapter.insert(&self.name, prepared).await?;
        self.emit(EventKind::Created, &stored);
        Ok(stored)
    }

    /// Merge `patch` into the stored record. The id cannot change.
    pub async fn update(&self, id: &str, patch: Record) -> Result<Record> {
        let existing = self.require(id).await?;
        let merged = self.prepare_update(existing, &patch);
        self.check(&merged)?;
        self.check_unique(std::slice::from_ref(&merged)).await?;

        let updated = self.adapter.update(&self.name, id, merged).await?;
        self.emit(EventKind::Updated, &updated);
        Ok(updated)
    }

    /// Update when a record with the same id exists, insert otherwise.
    pub async fn upsert(&self, record: Record) -> Result<Record> {
        let existing = match record.id() {
            Some(id) if !id.is_empty() => self.get(id).await?,
            _ => None,
        };
        match existing {
            Some(existing) => {
                let id = existing.id().unwrap_or_default().to_string();
                self.update(&id, record).await
            }
            None => self.insert(record).await,
        }
    }

    /// Remove a record, applying the relation policies of its dependents.
    ///
    /// Returns `false` when there was nothing to remove.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let Some(existing) = self.get(id).await? else {
            return Ok(false);
        };
        let plan = self.plan_removal(vec![existing]).await?;
        Ok(self.execute_removal(plan, None).await? > 0)
    }

    pub async fn bulk_insert(
        &self,
        records: Vec<Record>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let prepared: Vec<Record> = records
            .into_iter()
            .map(|r| self.prepare_insert(r))
            .collect();
        self.check_batch(&prepared)?;
        self.check_unique(&prepared).await?;

        let stored = self
            .adapter
            .bulk_insert(&self.name, prepared, progress)
            .await?;
        for record in &stored {
            self.emit(EventKind::Created, record);
        }
        Ok(stored)
    }

    pub async fn bulk_update(
        &self,
        updates: Vec<RecordPatch>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let mut merged = Vec::with_capacity(updates.len());
        for RecordPatch { id, patch } in &updates {
            let existing = self.require(id).await?;
            merged.push(self.prepare_update(existing, patch));
        }
        self.check_batch(&merged)?;
        self.check_unique(&merged).await?;

        let patches = updates
            .into_iter()
            .zip(merged)
            .map(|(update, record)| RecordPatch::new(update.id, record))
            .collect();
        let updated = self
            .adapter
            .bulk_update(&self.name, patches, progress)
            .await?;
        for record in &updated {
            self.emit(EventKind::Updated, record);
        }
        Ok(updated)
    }

    /// Remove many records; returns how many existed.
    pub async fn bulk_remove(
        &self,
        ids: Vec<RecordId>,
        progress: Option<&ProgressFn>,
    ) -> Result<usize> {
        let mut roots = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(record) = self.get(id).await? {
                roots.push(record);
            }
        }
        if roots.is_empty() {
            return Ok(0);
        }
        let plan = self.plan_removal(roots).await?;
        self.execute_removal(plan, progress).await
    }

    pub async fn count(&self, filters: &[QueryFilter]) -> Result<usize> {
        self.adapter.count(&self.name, filters).await
    }

    pub async fn aggregate(&self, spec: &AggregateSpec) -> Result<Vec<AggregateRow>> {
        self.adapter.aggregate(&self.name, spec).await
    }

    pub async fn export(&self) -> Result<Vec<Record>> {
        self.adapter.export(&self.name).await
    }

    /// Validate and load records. Emits no per-record events.
    pub async fn import(&self, records: Vec<Record>, mode: ImportMode) -> Result<usize> {
        let prepared: Vec<Record> = records
            .into_iter()
            .map(|record| {
                let mut record = ensure_id(record);
                self.schema.apply_computed(&mut record);
                record
            })
            .collect();
        self.check_batch(&prepared)?;

        let written = self.adapter.import(&self.name, prepared, mode).await?;
        tracing::info!(collection = %self.name, records = written, ?mode, "Imported collection");
        Ok(written)
    }

    pub async fn clear(&self) -> Result<()> {
        self.adapter.clear(&self.name).await
    }

    /// Start a query against this collection.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder {
            collection: self,
            spec: QuerySpec::new(),
        }
    }

    fn prepare_insert(&self, record: Record) -> Record {
        let mut record = ensure_id(record);
        let now = timestamp();
        for field in [CREATED_AT_FIELD, UPDATED_AT_FIELD] {
            if self.schema.has_field(field) && is_absent(record.get(field)) {
                record.insert(field, Value::String(now.clone()));
            }
        }
        self.schema.apply_computed(&mut record);
        record
    }

    fn prepare_update(&self, mut existing: Record, patch: &Record) -> Record {
        existing.merge(patch);
        if self.schema.has_field(UPDATED_AT_FIELD) {
            existing.insert(UPDATED_AT_FIELD, Value::String(timestamp()));
        }
        self.schema.apply_computed(&mut existing);
        existing
    }

    fn check(&self, record: &Record) -> Result<()> {
        let errors = validate_record(record, &self.schema)?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(errors))
        }
    }

    /// Validate a batch; messages are prefixed with the record's position.
    fn check_batch(&self, records: &[Record]) -> Result<()> {
        let mut errors = Vec::new();
        for (index, record) in records.iter().enumerate() {
            for message in validate_record(record, &self.schema)? {
                errors.push(format!("record {}: {}", index, message));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(errors))
        }
    }

    /// Reject candidates that collide with another record on a unique index.
    ///
    /// Candidates whose indexed fields are not all present are skipped.
    async fn check_unique(&self, candidates: &[Record]) -> Result<()> {
        let unique: Vec<_> = self.schema.indexes.iter().filter(|i| i.unique).collect();
        if unique.is_empty() {
            return Ok(());
        }
        let stored = self.adapter.get_all(&self.name).await?;

        for index in unique {
            let mut seen: HashMap<String, Option<String>> = HashMap::new();
            for record in &stored {
                if let Some(key) = index_key(record, &index.fields) {
                    seen.insert(key, record.id().map(String::from));
                }
            }
            for candidate in candidates {
                let Some(key) = index_key(candidate, &index.fields) else {
                    continue;
                };
                let own = candidate.id().map(String::from);
                if let Some(holder) = seen.get(&key) {
                    if *holder != own {
                        return Err(StoreError::Constraint(format!(
                            "unique index ({}) of '{}' already holds {}",
                            index.fields.join(", "),
                            self.name,
                            key
                        )));
                    }
                }
                seen.insert(key, own);
            }
        }
        Ok(())
    }

    /// Walk the relation graph from `roots` and collect every write a
    /// removal implies. Restricted dependents abort the walk.
    async fn plan_removal(&self, roots: Vec<Record>) -> Result<RemovalPlan> {
        let mut plan = RemovalPlan::default();
        let mut visited: HashSet<(CollectionName, RecordId)> = HashSet::new();
        let mut frontier: VecDeque<Removal> = VecDeque::new();

        for record in roots {
            if let Some(id) = record.id() {
                if visited.insert((self.name.clone(), id.to_string())) {
                    frontier.push_back(Removal {
                        collection: self.name.clone(),
                        record,
                        root: true,
                    });
                }
            }
        }

        while let Some(removal) = frontier.pop_front() {
            let Removal { collection, record, .. } = &removal;
            let id = record.id().unwrap_or_default().to_string();
            for dependent in self.registry.dependents_of(collection) {
                let filter = QueryFilter::eq(&dependent.field, Value::String(id.clone()));
                let found = self
                    .adapter
                    .query(&dependent.collection, &QuerySpec::new().with_filter(filter))
                    .await?;
                let found: Vec<Record> = found
                    .into_iter()
                    .filter(|r| {
                        r.id().map_or(false, |rid| {
                            !visited.contains(&(dependent.collection.clone(), rid.to_string()))
                        })
                    })
                    .collect();
                if found.is_empty() {
                    continue;
                }

                match dependent.on_delete {
                    CascadePolicy::Restrict => {
                        return Err(StoreError::Constraint(format!(
                            "cannot remove {}/{}: referenced by {} record(s) in '{}' through '{}'",
                            collection,
                            id,
                            found.len(),
                            dependent.collection,
                            dependent.field
                        )));
                    }
                    CascadePolicy::Cascade => {
                        for child in found {
                            let child_id = child.id().unwrap_or_default().to_string();
                            visited.insert((dependent.collection.clone(), child_id));
                            frontier.push_back(Removal {
                                collection: dependent.collection.clone(),
                                record: child,
                                root: false,
                            });
                        }
                    }
                    CascadePolicy::Nullify => {
                        for child in found {
                            let child_id = child.id().unwrap_or_default().to_string();
                            plan.nullify.push((
                                dependent.collection.clone(),
                                child_id,
                                dependent.field.clone(),
                            ));
                        }
                    }
                }
            }
            plan.removals.push(removal);
        }

        // A record removed by a later cascade needs no nullify.
        plan.nullify
            .retain(|(collection, id, _)| !visited.contains(&(collection.clone(), id.clone())));

        tracing::debug!(
            collection = %self.name,
            removals = plan.removals.len(),
            nullify = plan.nullify.len(),
            "Planned removal"
        );
        Ok(plan)
    }

    /// Apply a removal plan and return how many roots were removed. Roots go
    /// through one bulk call when there are several or `progress` is given.
    async fn execute_removal(
        &self,
        plan: RemovalPlan,
        progress: Option<&ProgressFn>,
    ) -> Result<usize> {
        for (collection, id, field) in plan.nullify {
            let mut patch = Record::new();
            patch.insert(field, Value::Null);
            let updated = self.adapter.update(&collection, &id, patch).await?;
            self.events
                .emit(StoreEvent::new(collection, EventKind::Updated, updated));
        }

        let (roots, cascaded): (Vec<Removal>, Vec<Removal>) =
            plan.removals.into_iter().partition(|removal| removal.root);

        for Removal { collection, record, .. } in cascaded.into_iter().rev() {
            let id = record.id().unwrap_or_default().to_string();
            if self.adapter.remove(&collection, &id).await? {
                self.events
                    .emit(StoreEvent::new(collection, EventKind::Removed, record));
            }
        }

        let mut removed = 0;
        if progress.is_some() || roots.len() > 1 {
            let ids: Vec<RecordId> = roots
                .iter()
                .filter_map(|removal| removal.record.id().map(String::from))
                .collect();
            removed = self.adapter.bulk_remove(&self.name, ids, progress).await?;
            for removal in &roots {
                self.emit(EventKind::Removed, &removal.record);
            }
        } else {
            for Removal { record, .. } in roots {
                let id = record.id().unwrap_or_default().to_string();
                if self.adapter.remove(&self.name, &id).await? {
                    removed += 1;
                    self.emit(EventKind::Removed, &record);
                }
            }
        }
        Ok(removed)
    }

    fn emit(&self, kind: EventKind, record: &Record) {
        self.events
            .emit(StoreEvent::new(self.name.clone(), kind, record.clone()));
    }
}

/// Current time as an RFC 3339 UTC string.
fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Serialized values of `fields`, or `None` when any is absent.
fn index_key(record: &Record, fields: &[String]) -> Option<String> {
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        let value = record.resolve(field).filter(|v| !v.is_null())?;
        values.push(value);
    }
    serde_json::to_string(&values).ok()
}

/// Fluent query over one collection, compiled to a [`QuerySpec`].
///
/// Every method consumes the builder and returns a new one.
#[derive(Debug, Clone)]
#[must_use]
pub struct QueryBuilder<'a> {
    collection: &'a Collection,
    spec: QuerySpec,
}

impl<'a> QueryBuilder<'a> {
    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: FilterOperator,
        value: Value,
    ) -> Self {
        self.spec.filters.push(QueryFilter::new(field, operator, value));
        self
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.spec.filters.push(QueryFilter::eq(field, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.spec.order_by.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.spec.offset = Some(offset);
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn into_spec(self) -> QuerySpec {
        self.spec
    }

    pub async fn execute(&self) -> Result<Vec<Record>> {
        self.collection
            .adapter
            .query(&self.collection.name, &self.spec)
            .await
    }

    /// First match after ordering and offset.
    pub async fn first(&self) -> Result<Option<Record>> {
        let spec = QuerySpec {
            limit: Some(1),
            ..self.spec.clone()
        };
        let mut found = self
            .collection
            .adapter
            .query(&self.collection.name, &spec)
            .await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    /// Number of matches, ignoring limit and offset.
    pub async fn count(&self) -> Result<usize> {
        self.collection.count(&self.spec.filters).await
    }
}
