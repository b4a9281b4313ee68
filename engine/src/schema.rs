//! Schema definitions and the schema registry.
//!
//! A schema describes one collection: its fields, relations, indexes,
//! computed fields, record-level validators and migrations. Declarative
//! parts serialize; function-valued parts are skipped.

use crate::migration::Migration;
use crate::{error::Result, CollectionName, Error, Record, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Semantic field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// RFC 3339 / `YYYY-MM-DD` string, or epoch milliseconds
    Date,
    /// Non-empty string identifier
    Id,
    /// One of the field's declared values
    Enum,
    Array,
    Object,
    Currency,
    Percentage,
}

impl FieldType {
    /// Types whose values are JSON numbers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Number | FieldType::Currency | FieldType::Percentage
        )
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Date => write!(f, "date"),
            FieldType::Id => write!(f, "id"),
            FieldType::Enum => write!(f, "enum"),
            FieldType::Array => write!(f, "array"),
            FieldType::Object => write!(f, "object"),
            FieldType::Currency => write!(f, "currency"),
            FieldType::Percentage => write!(f, "percentage"),
        }
    }
}

/// Custom field check. Receives the value, the field definition and, when
/// validating a whole record, the record itself for cross-field checks.
/// Returns an error message or `None`.
pub type FieldValidator =
    Arc<dyn Fn(&Value, &FieldDef, Option<&Record>) -> Option<String> + Send + Sync>;

/// Multi-field check over a whole record.
pub type RecordValidator = Arc<dyn Fn(&Record) -> Option<String> + Send + Sync>;

/// Derives a field value from the rest of the record.
pub type ComputeFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Definition of a field in a collection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name, dotted for nested values
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether this field is required
    #[serde(default)]
    pub required: bool,
    /// Inclusive lower bound (value for numbers, length for strings and arrays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound (value for numbers, length for strings and arrays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression string values must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Allowed values of an enum field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(skip)]
    pub validators: Vec<FieldValidator>,
}

impl FieldDef {
    fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
            min: None,
            max: None,
            pattern: None,
            values: None,
            validators: Vec::new(),
        }
    }

    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, true)
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, false)
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set the allowed values of an enum field.
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Attach a custom validator.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value, &FieldDef, Option<&Record>) -> Option<String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }
}

impl std::fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("pattern", &self.pattern)
            .field("values", &self.values)
            .field("validators", &self.validators.len())
            .finish()
    }
}

/// Kind of relation between two collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    /// The declaring record holds the foreign key
    BelongsTo,
    /// The target record holds the foreign key; at most one target
    HasOne,
    /// The target records hold the foreign key
    HasMany,
    /// The declaring record holds an array of target ids
    ManyToMany,
}

/// What happens to dependents when a referenced record is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadePolicy {
    /// Set the dependent's foreign key to null
    Nullify,
    /// Remove the dependents too
    Cascade,
    /// Refuse the removal while dependents exist
    #[default]
    Restrict,
}

/// A relation declared by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    /// Foreign-key field (on the declaring record for belongs-to, on the
    /// target records for has-one / has-many)
    pub field: String,
    /// Target collection
    pub target: CollectionName,
    pub kind: RelationKind,
    #[serde(default)]
    pub on_delete: CascadePolicy,
}

impl RelationDef {
    pub fn new(
        field: impl Into<String>,
        target: impl Into<CollectionName>,
        kind: RelationKind,
        on_delete: CascadePolicy,
    ) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            kind,
            on_delete,
        }
    }

    /// `field` on this record references `target`.
    pub fn belongs_to(
        field: impl Into<String>,
        target: impl Into<CollectionName>,
        on_delete: CascadePolicy,
    ) -> Self {
        Self::new(field, target, RelationKind::BelongsTo, on_delete)
    }

    /// `field` on `target` records references this record.
    pub fn has_many(
        field: impl Into<String>,
        target: impl Into<CollectionName>,
        on_delete: CascadePolicy,
    ) -> Self {
        Self::new(field, target, RelationKind::HasMany, on_delete)
    }
}

/// An index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unique: true,
            ..Self::new(fields)
        }
    }
}

/// A field whose value is derived on every write.
#[derive(Clone)]
pub struct ComputedField {
    pub name: String,
    compute: ComputeFn,
}

impl ComputedField {
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    /// Compute the value for a record.
    pub fn compute(&self, record: &Record) -> Value {
        (self.compute)(record)
    }
}

impl std::fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedField")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Schema for one collection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    /// Collection name, e.g. `ap/invoice`
    pub collection: CollectionName,
    /// Owning module, e.g. `accounts-payable`
    pub module: String,
    /// Current schema version
    pub version: SchemaVersion,
    /// Field definitions, in declaration order
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(skip)]
    pub computed: Vec<ComputedField>,
    #[serde(skip)]
    pub validators: Vec<RecordValidator>,
    #[serde(skip)]
    pub migrations: Vec<Migration>,
}

impl SchemaDefinition {
    /// Create a new schema with no fields.
    pub fn new(
        collection: impl Into<CollectionName>,
        module: impl Into<String>,
        version: SchemaVersion,
    ) -> Self {
        Self {
            collection: collection.into(),
            module: module.into(),
            version,
            fields: Vec::new(),
            relations: Vec::new(),
            indexes: Vec::new(),
            computed: Vec::new(),
            validators: Vec::new(),
            migrations: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_computed(mut self, computed: ComputedField) -> Self {
        self.computed.push(computed);
        self
    }

    /// Attach a record-level validator.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Record) -> Option<String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the schema declares a field.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Recompute every computed field in place.
    pub fn apply_computed(&self, record: &mut Record) {
        for computed in &self.computed {
            let value = computed.compute(record);
            record.insert(computed.name.clone(), value);
        }
    }

    /// Check the schema's own invariants.
    ///
    /// Field names must be unique, migrations strictly increasing and not
    /// beyond the schema version, patterns must compile, enum fields need
    /// values and bounds must be ordered.
    pub fn check(&self) -> Result<()> {
        let invalid = |reason: String| Error::invalid_schema(self.collection.clone(), reason);

        if self.collection.is_empty() {
            return Err(invalid("collection name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            if let Some(pattern) = &field.pattern {
                regex_lite::Regex::new(pattern).map_err(|e| {
                    invalid(format!("invalid pattern for '{}': {}", field.name, e))
                })?;
            }
            if field.field_type == FieldType::Enum
                && field.values.as_ref().map_or(true, Vec::is_empty)
            {
                return Err(invalid(format!("enum field '{}' has no values", field.name)));
            }
            if let (Some(min), Some(max)) = (field.min, field.max) {
                if min > max {
                    return Err(invalid(format!(
                        "field '{}' has min {} greater than max {}",
                        field.name, min, max
                    )));
                }
            }
        }

        let mut previous = 0;
        for migration in &self.migrations {
            if migration.version <= previous {
                return Err(invalid(format!(
                    "migration versions must be strictly increasing (found {} after {})",
                    migration.version, previous
                )));
            }
            previous = migration.version;
        }
        if previous > self.version {
            return Err(invalid(format!(
                "migration to version {} exceeds schema version {}",
                previous, self.version
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for SchemaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaDefinition")
            .field("collection", &self.collection)
            .field("module", &self.module)
            .field("version", &self.version)
            .field("fields", &self.fields)
            .field("relations", &self.relations)
            .field("indexes", &self.indexes)
            .field("computed", &self.computed)
            .field("validators", &self.validators.len())
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

/// A collection whose records reference another collection's records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependent {
    /// Collection holding the foreign key
    pub collection: CollectionName,
    /// Foreign-key field
    pub field: String,
    pub on_delete: CascadePolicy,
}

/// All registered schemas, by collection name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<CollectionName, Arc<SchemaDefinition>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Register a schema after checking its invariants.
    pub fn register(&mut self, schema: SchemaDefinition) -> Result<&mut Self> {
        schema.check()?;
        if self.schemas.contains_key(&schema.collection) {
            return Err(Error::DuplicateSchema(schema.collection));
        }
        self.schemas
            .insert(schema.collection.clone(), Arc::new(schema));
        Ok(self)
    }

    /// Builder-style method to register a schema.
    pub fn with_schema(mut self, schema: SchemaDefinition) -> Result<Self> {
        self.register(schema)?;
        Ok(self)
    }

    /// Get a schema by collection name.
    pub fn get(&self, collection: &str) -> Option<Arc<SchemaDefinition>> {
        self.schemas.get(collection).cloned()
    }

    /// Get a schema, failing with [`Error::SchemaNotFound`].
    pub fn require(&self, collection: &str) -> Result<Arc<SchemaDefinition>> {
        self.get(collection)
            .ok_or_else(|| Error::SchemaNotFound(collection.to_string()))
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.schemas.contains_key(collection)
    }

    /// Registered collection names, sorted.
    pub fn collections(&self) -> Vec<CollectionName> {
        let mut names: Vec<_> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Every foreign key that references records of `collection`.
    ///
    /// Belongs-to relations declared by other schemas and has-one / has-many
    /// relations declared by `collection` itself. Many-to-many relations are
    /// not included.
    pub fn dependents_of(&self, collection: &str) -> Vec<Dependent> {
        let mut dependents = Vec::new();

        for name in self.collections() {
            let Some(schema) = self.schemas.get(&name) else {
                continue;
            };
            for relation in &schema.relations {
                let dependent = match relation.kind {
                    RelationKind::BelongsTo if relation.target == collection => Dependent {
                        collection: schema.collection.clone(),
                        field: relation.field.clone(),
                        on_delete: relation.on_delete,
                    },
                    RelationKind::HasOne | RelationKind::HasMany
                        if schema.collection == collection =>
                    {
                        Dependent {
                            collection: relation.target.clone(),
                            field: relation.field.clone(),
                            on_delete: relation.on_delete,
                        }
                    }
                    _ => continue,
                };
                if !dependents.contains(&dependent) {
                    dependents.push(dependent);
                }
            }
        }

        dependents
    }
}
