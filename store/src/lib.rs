//! # Folio Store
//!
//! The async, offline-first layer over [`folio_engine`].
//!
//! - [`adapter`] - the [`StorageAdapter`] contract with key-value, SQLite and
//!   composite (offline-first) implementations
//! - [`sync`] - replayable write actions and the durable retry queue
//! - [`collection`] - schema-bound collections and the query builder
//! - [`store`] - the orchestrator: adapter selection, migrations,
//!   transactions, import/export, seed and reset
//!
//! ## Quick Start
//!
//! ```no_run
//! use folio_engine::{FieldDef, FieldType, Record, SchemaDefinition};
//! use folio_store::Store;
//! use serde_json::json;
//!
//! # async fn run() -> folio_store::Result<()> {
//! let store = Store::builder()
//!     .schema(
//!         SchemaDefinition::new("inv/item", "inventory", 1)
//!             .with_field(FieldDef::required("sku", FieldType::String))
//!             .with_field(FieldDef::required("unitCost", FieldType::Currency).with_min(0.0)),
//!     )
//!     .open()
//!     .await?;
//!
//! let items = store.collection("inv/item")?;
//! let item = items
//!     .insert(Record::from_value(json!({"sku": "X1", "unitCost": 10}))?)
//!     .await?;
//! assert!(item.id().is_some());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod policy;
pub mod store;
pub mod sync;

pub use adapter::{
    CompositeAdapter, ImportMode, KeyValueAdapter, ProgressFn, RecordPatch, SqliteAdapter,
    StorageAdapter,
};
pub use collection::{Collection, QueryBuilder};
pub use config::{ConfigError, StoreConfig};
pub use error::{ErrorKind, Result, StoreError};
pub use events::{EventBus, EventKind, EventReceiver, StoreEvent};
pub use policy::{AdapterChoice, AdapterCounts, AdapterPolicy, ThresholdPolicy};
pub use store::{Store, StoreBuilder, StoreStats, Transaction};
pub use sync::{
    FileQueueStore, MemoryQueueStore, QueueEntry, QueueStore, SyncAction, SyncQueue, SyncReport,
    MAX_SYNC_RETRIES,
};
