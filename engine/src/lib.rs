//! # Folio Engine
//!
//! The pure core of the Folio local-first record store.
//!
//! This crate holds everything about records that does not need IO: the
//! record model, the query evaluator, schema definitions and validation,
//! schema migrations and the export bundle format. The async storage layer
//! lives in `folio-store` and calls into this crate.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, databases or the network
//! - **Deterministic**: sorting is stable and aggregation groups keep
//!   first-seen order
//! - **Backend independent**: adapters that cannot push a query down
//!   evaluate it here, so every backend filters and orders identically
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an ordered JSON object with a string `id` field. Field
//! paths may be dotted (`vendor.address.city`).
//!
//! ### Queries
//!
//! A [`QuerySpec`] is a list of [`QueryFilter`]s (combined with AND), an
//! ordered list of [`SortKey`]s and optional offset / limit. [`evaluate`]
//! applies it to a batch of records.
//!
//! ### Schemas
//!
//! A [`SchemaDefinition`] declares a collection's fields, relations, indexes,
//! computed fields, validators and migrations. Schemas are registered in a
//! [`SchemaRegistry`], which checks their invariants.
//!
//! ### Migrations
//!
//! The [`MigrationEngine`] folds a schema's [`Migration`]s over a record batch
//! to bring it from one schema version to another.
//!
//! ## Quick Start
//!
//! ```rust
//! use folio_engine::{
//!     evaluate, validate_record, FieldDef, FieldType, QueryFilter, QuerySpec, Record,
//!     SchemaDefinition, SchemaRegistry, SortKey,
//! };
//! use serde_json::json;
//!
//! // 1. Define and register a schema
//! let schema = SchemaDefinition::new("inv/item", "inventory", 1)
//!     .with_field(FieldDef::required("sku", FieldType::String))
//!     .with_field(FieldDef::required("unitCost", FieldType::Currency).with_min(0.0));
//! let registry = SchemaRegistry::new().with_schema(schema).unwrap();
//! let schema = registry.require("inv/item").unwrap();
//!
//! // 2. Validate records
//! let bad = Record::from_value(json!({"sku": "X1", "unitCost": -5})).unwrap();
//! assert_eq!(
//!     validate_record(&bad, &schema).unwrap(),
//!     vec!["unitCost is below the minimum of 0"]
//! );
//!
//! // 3. Query records
//! let records = vec![
//!     Record::from_value(json!({"id": "a", "sku": "X2", "unitCost": 4})).unwrap(),
//!     Record::from_value(json!({"id": "b", "sku": "X1", "unitCost": 9})).unwrap(),
//! ];
//! let spec = QuerySpec::new()
//!     .with_filter(QueryFilter::eq("sku", json!("X1")))
//!     .with_order(SortKey::desc("unitCost"));
//! let found = evaluate(records, &spec);
//! assert_eq!(found[0].id(), Some("b"));
//! ```

pub mod error;
pub mod export;
pub mod migration;
pub mod query;
pub mod record;
pub mod schema;
pub mod validate;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use export::{ExportBundle, BUNDLE_FORMAT_VERSION};
pub use migration::{run_migrations, Migration, MigrationEngine};
pub use query::{
    aggregate, apply_filters, apply_pagination, apply_sorting, evaluate, matches_filter,
    AggregateFunction, AggregateRow, AggregateSpec, Aggregation, FilterOperator, QueryFilter,
    QuerySpec, SortDirection, SortKey,
};
pub use record::{Record, ID_FIELD};
pub use schema::{
    CascadePolicy, ComputedField, Dependent, FieldDef, FieldType, IndexDef, RelationDef,
    RelationKind, SchemaDefinition, SchemaRegistry,
};
pub use validate::{validate_field, validate_record};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type SchemaVersion = u32;
pub type Timestamp = u64;
