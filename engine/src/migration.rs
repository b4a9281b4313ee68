//! Schema migrations over raw record batches.
//!
//! A migration transforms every stored record of a collection to the shape
//! of its target version. Runs are all-or-nothing: the input batch is never
//! modified, and the first failing transform aborts the run.

use crate::{
    error::Result, CollectionName, Error, Record, SchemaDefinition, SchemaRegistry, SchemaVersion,
};
use std::sync::Arc;

/// Batch transform applied by a [`Migration`].
pub type MigrationFn =
    Arc<dyn Fn(Vec<Record>) -> std::result::Result<Vec<Record>, String> + Send + Sync>;

/// A transform that brings records up to `version`.
#[derive(Clone)]
pub struct Migration {
    /// Target version
    pub version: SchemaVersion,
    pub description: String,
    transform: MigrationFn,
}

impl Migration {
    pub fn new<F>(version: SchemaVersion, description: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Vec<Record>) -> std::result::Result<Vec<Record>, String> + Send + Sync + 'static,
    {
        Self {
            version,
            description: description.into(),
            transform: Arc::new(transform),
        }
    }

    /// Per-record convenience constructor.
    pub fn map_records<F>(version: SchemaVersion, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Record) -> std::result::Result<Record, String> + Send + Sync + 'static,
    {
        Self::new(version, description, move |records: Vec<Record>| {
            records.into_iter().map(&f).collect()
        })
    }

    /// Apply the transform.
    pub fn apply(&self, records: Vec<Record>) -> std::result::Result<Vec<Record>, String> {
        (self.transform)(records)
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Apply every migration of `schema` with a version in `(from, to]`, in
/// ascending order.
pub fn run_migrations(
    schema: &SchemaDefinition,
    records: &[Record],
    from: SchemaVersion,
    to: SchemaVersion,
) -> Result<Vec<Record>> {
    let mut steps: Vec<&Migration> = schema
        .migrations
        .iter()
        .filter(|m| m.version > from && m.version <= to)
        .collect();
    steps.sort_by_key(|m| m.version);

    let mut batch = records.to_vec();
    for step in steps {
        batch = step.apply(batch).map_err(|reason| Error::Migration {
            collection: schema.collection.clone(),
            version: step.version,
            reason,
        })?;
    }
    Ok(batch)
}

/// Runs migrations for registered collections.
#[derive(Debug, Clone, Copy)]
pub struct MigrationEngine<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Migrate a batch of `collection` records from `from` to `to`.
    ///
    /// An unregistered collection is a configuration error.
    pub fn run(
        &self,
        collection: &str,
        records: &[Record],
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<Record>> {
        let schema = self.registry.require(collection)?;
        run_migrations(&schema, records, from, to)
    }

    /// Migrate a batch up to the collection's current schema version.
    pub fn run_to_current(
        &self,
        collection: &str,
        records: &[Record],
        from: SchemaVersion,
    ) -> Result<(Vec<Record>, SchemaVersion)> {
        let schema = self.registry.require(collection)?;
        let migrated = run_migrations(&schema, records, from, schema.version)?;
        Ok((migrated, schema.version.max(from)))
    }

    /// Versions that would be applied when migrating from `from`.
    pub fn pending(&self, collection: &str, from: SchemaVersion) -> Result<Vec<SchemaVersion>> {
        let schema = self.registry.require(collection)?;
        let mut versions: Vec<_> = schema
            .migrations
            .iter()
            .map(|m| m.version)
            .filter(|v| *v > from && *v <= schema.version)
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Collections registered with the engine.
    pub fn collections(&self) -> Vec<CollectionName> {
        self.registry.collections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDef, FieldType};
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    /// v2 renames `cost` to `unitCost`, v3 adds a default `currency`.
    fn item_schema() -> SchemaDefinition {
        SchemaDefinition::new("inv/item", "inventory", 3)
            .with_field(FieldDef::required("sku", FieldType::String))
            .with_migration(Migration::map_records(2, "rename cost", |mut r| {
                if let Some(cost) = r.remove("cost") {
                    r.insert("unitCost", cost);
                }
                Ok(r)
            }))
            .with_migration(Migration::map_records(3, "default currency", |mut r| {
                if !r.contains("currency") {
                    r.insert("currency", json!("USD"));
                }
                Ok(r)
            }))
    }

    fn batch() -> Vec<Record> {
        vec![
            record(json!({"id": "a", "sku": "X1", "cost": 4})),
            record(json!({"id": "b", "sku": "X2", "cost": 9, "currency": "EUR"})),
        ]
    }

    #[test]
    fn same_version_is_a_no_op() {
        let schema = item_schema();
        let input = batch();
        assert_eq!(run_migrations(&schema, &input, 2, 2).unwrap(), input);
    }

    #[test]
    fn runs_migrations_in_version_order() {
        let migrated = run_migrations(&item_schema(), &batch(), 1, 3).unwrap();
        assert_eq!(
            migrated[0],
            record(json!({"id": "a", "sku": "X1", "unitCost": 4, "currency": "USD"}))
        );
        assert_eq!(migrated[1].get("currency"), Some(&json!("EUR")));
    }

    #[test]
    fn stepwise_equals_direct() {
        let schema = item_schema();
        let direct = run_migrations(&schema, &batch(), 1, 3).unwrap();
        let step = run_migrations(&schema, &batch(), 1, 2).unwrap();
        let stepwise = run_migrations(&schema, &step, 2, 3).unwrap();
        assert_eq!(direct, stepwise);
    }

    #[test]
    fn only_versions_in_range_apply() {
        let migrated = run_migrations(&item_schema(), &batch(), 2, 3).unwrap();
        // cost was not renamed because version 2 is outside (2, 3]
        assert_eq!(migrated[0].get("cost"), Some(&json!(4)));
        assert_eq!(migrated[0].get("currency"), Some(&json!("USD")));
    }

    #[test]
    fn failing_transform_aborts_and_leaves_input() {
        let schema = item_schema().with_migration(Migration::new(4, "broken", |_| {
            Err("cannot parse legacy cost".to_string())
        }));
        let schema = SchemaDefinition {
            version: 4,
            ..schema
        };
        let input = batch();
        let err = run_migrations(&schema, &input, 1, 4).unwrap_err();
        assert_eq!(
            err,
            Error::Migration {
                collection: "inv/item".into(),
                version: 4,
                reason: "cannot parse legacy cost".into(),
            }
        );
        assert_eq!(input, batch());
    }

    #[test]
    fn engine_requires_registered_schema() {
        let registry = SchemaRegistry::new().with_schema(item_schema()).unwrap();
        let engine = MigrationEngine::new(&registry);

        assert_eq!(
            engine.run("ap/invoice", &batch(), 1, 2).unwrap_err(),
            Error::SchemaNotFound("ap/invoice".into())
        );
        assert_eq!(engine.pending("inv/item", 1).unwrap(), vec![2, 3]);
        assert_eq!(engine.pending("inv/item", 3).unwrap(), Vec::<u32>::new());

        let (migrated, version) = engine.run_to_current("inv/item", &batch(), 1).unwrap();
        assert_eq!(version, 3);
        assert_eq!(migrated[0].get("unitCost"), Some(&json!(4)));
    }
}
