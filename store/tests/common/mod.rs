//! Shared helpers for store integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use folio_engine::{
    CascadePolicy, CollectionName, FieldDef, FieldType, IndexDef, Migration, Record, RelationDef,
    SchemaDefinition, SchemaRegistry,
};
use folio_store::{ImportMode, KeyValueAdapter, StorageAdapter, StoreError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub fn record(value: Value) -> Record {
    Record::from_value(value).unwrap()
}

/// Remote adapter that can be switched offline. Offline, every write fails
/// with [`StoreError::Unavailable`]; reads always work.
#[derive(Debug, Default)]
pub struct ToggleRemote {
    inner: KeyValueAdapter,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl ToggleRemote {
    pub fn online() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        let remote = Self::default();
        remote.set_offline(true);
        remote
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Writes accepted so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn accept(&self) -> folio_store::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote offline".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for ToggleRemote {
    fn name(&self) -> &str {
        "toggle-remote"
    }

    async fn get(&self, collection: &str, id: &str) -> folio_store::Result<Option<Record>> {
        self.inner.get(collection, id).await
    }

    async fn get_all(&self, collection: &str) -> folio_store::Result<Vec<Record>> {
        self.inner.get_all(collection).await
    }

    async fn insert(&self, collection: &str, record: Record) -> folio_store::Result<Record> {
        self.accept()?;
        self.inner.insert(collection, record).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Record,
    ) -> folio_store::Result<Record> {
        self.accept()?;
        self.inner.update(collection, id, patch).await
    }

    async fn upsert(&self, collection: &str, record: Record) -> folio_store::Result<Record> {
        self.accept()?;
        self.inner.upsert(collection, record).await
    }

    async fn remove(&self, collection: &str, id: &str) -> folio_store::Result<bool> {
        self.accept()?;
        self.inner.remove(collection, id).await
    }

    async fn clear(&self, collection: &str) -> folio_store::Result<()> {
        self.accept()?;
        self.inner.clear(collection).await
    }

    async fn import(
        &self,
        collection: &str,
        records: Vec<Record>,
        mode: ImportMode,
    ) -> folio_store::Result<usize> {
        self.accept()?;
        self.inner.import(collection, records, mode).await
    }

    async fn collections(&self) -> folio_store::Result<Vec<CollectionName>> {
        self.inner.collections().await
    }

    async fn destroy(&self) -> folio_store::Result<()> {
        self.inner.destroy().await
    }
}

/// `inv/item`: required `sku` string, required non-negative `unitCost`.
pub fn item_schema() -> SchemaDefinition {
    SchemaDefinition::new("inv/item", "inventory", 1)
        .with_field(FieldDef::required("sku", FieldType::String))
        .with_field(FieldDef::required("unitCost", FieldType::Currency).with_min(0.0))
        .with_field(FieldDef::optional("qty", FieldType::Number).with_min(0.0))
}

/// `ap/vendor` with invoices that restrict its removal, bills that cascade
/// and payments that are nullified.
pub fn payables_registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with_schema(
            SchemaDefinition::new("ap/vendor", "accounts-payable", 1)
                .with_field(FieldDef::required("name", FieldType::String))
                .with_index(IndexDef::unique(["name"])),
        )
        .unwrap()
        .with_schema(
            SchemaDefinition::new("ap/invoice", "accounts-payable", 1)
                .with_field(FieldDef::required("number", FieldType::String))
                .with_field(FieldDef::optional("vendorId", FieldType::Id))
                .with_relation(RelationDef::belongs_to(
                    "vendorId",
                    "ap/vendor",
                    CascadePolicy::Restrict,
                )),
        )
        .unwrap()
        .with_schema(
            SchemaDefinition::new("ap/bill", "accounts-payable", 1)
                .with_field(FieldDef::required("amount", FieldType::Currency))
                .with_field(FieldDef::optional("vendorId", FieldType::Id))
                .with_relation(RelationDef::belongs_to(
                    "vendorId",
                    "ap/vendor",
                    CascadePolicy::Cascade,
                )),
        )
        .unwrap()
        .with_schema(
            SchemaDefinition::new("ap/bill-line", "accounts-payable", 1)
                .with_field(FieldDef::required("billId", FieldType::Id))
                .with_relation(RelationDef::belongs_to(
                    "billId",
                    "ap/bill",
                    CascadePolicy::Cascade,
                )),
        )
        .unwrap()
        .with_schema(
            SchemaDefinition::new("ap/payment", "accounts-payable", 1)
                .with_field(FieldDef::required("amount", FieldType::Currency))
                .with_field(FieldDef::optional("vendorId", FieldType::Id))
                .with_relation(RelationDef::belongs_to(
                    "vendorId",
                    "ap/vendor",
                    CascadePolicy::Nullify,
                )),
        )
        .unwrap()
}

/// `crm/contact` at version 2: version 2 splits `fullName` into
/// `firstName` / `lastName`.
pub fn contact_schema_v2() -> SchemaDefinition {
    SchemaDefinition::new("crm/contact", "crm", 2)
        .with_field(FieldDef::required("firstName", FieldType::String))
        .with_field(FieldDef::optional("lastName", FieldType::String))
        .with_migration(Migration::map_records(2, "split full name", |mut record| {
            let full = record
                .remove("fullName")
                .and_then(|v| v.as_str().map(String::from))
                .ok_or_else(|| "fullName missing".to_string())?;
            let mut parts = full.splitn(2, ' ');
            let first = parts.next().unwrap_or_default().to_string();
            record.insert("firstName", json!(first));
            if let Some(last) = parts.next() {
                record.insert("lastName", json!(last));
            }
            Ok(record)
        }))
}

/// `crm/contact` before the name split.
pub fn contact_schema_v1() -> SchemaDefinition {
    SchemaDefinition::new("crm/contact", "crm", 1)
        .with_field(FieldDef::required("fullName", FieldType::String))
}

pub fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.id().map(String::from))
        .collect()
}
