//! Record types for storing data.
//!
//! A record is an ordered mapping from field name to JSON value. The shape is
//! checked once, at the boundary: anything that is not a JSON object is
//! rejected before it can become a [`Record`].

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the identifier field every stored record carries.
pub const ID_FIELD: &str = "id";

/// A data record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Convert a JSON value into a record. Only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidRecord(format!(
                "record must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// The record identifier, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Set the record identifier.
    pub fn set_id(&mut self, id: impl Into<RecordId>) {
        self.0.insert(ID_FIELD.to_string(), Value::String(id.into()));
    }

    /// Builder-style variant of [`Record::set_id`].
    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.set_id(id);
        self
    }

    /// Get a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a top-level field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Remove a top-level field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Whether a top-level field is present (null counts as present).
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Resolve a dotted field path such as `vendor.address.city`.
    ///
    /// Array elements can be addressed by numeric segments (`lines.0.sku`).
    /// Returns `None` as soon as a segment is missing.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Shallow-merge `patch` into this record. The identifier is never
    /// overwritten.
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in &patch.0 {
            if field == ID_FIELD && self.0.contains_key(ID_FIELD) {
                continue;
            }
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Iterate over fields in order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

/// Short name of a JSON value's type, for messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Record::from_value(json!({"id": "a"})).is_ok());
        let err = Record::from_value(json!([1, 2])).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidRecord("record must be an object, got array".into())
        );
    }

    #[test]
    fn id_accessors() {
        let mut r = record(json!({"name": "Alice"}));
        assert_eq!(r.id(), None);
        r.set_id("user-1");
        assert_eq!(r.id(), Some("user-1"));

        let numeric = record(json!({"id": 7}));
        assert_eq!(numeric.id(), None);
    }

    #[test]
    fn resolve_dotted_paths() {
        let r = record(json!({
            "vendor": {"address": {"city": "Oslo"}},
            "lines": [{"sku": "X1"}, {"sku": "X2"}],
            "note": null
        }));

        assert_eq!(r.resolve("vendor.address.city"), Some(&json!("Oslo")));
        assert_eq!(r.resolve("lines.1.sku"), Some(&json!("X2")));
        assert_eq!(r.resolve("note"), Some(&Value::Null));
        assert_eq!(r.resolve("vendor.phone"), None);
        assert_eq!(r.resolve("vendor.address.city.zip"), None);
        assert_eq!(r.resolve("lines.x.sku"), None);
        assert_eq!(r.resolve("missing.deeper"), None);
    }

    #[test]
    fn merge_keeps_identifier() {
        let mut r = record(json!({"id": "a", "qty": 1, "sku": "X1"}));
        r.merge(&record(json!({"id": "b", "qty": 5, "bin": "A-3"})));

        assert_eq!(r.id(), Some("a"));
        assert_eq!(r.get("qty"), Some(&json!(5)));
        assert_eq!(r.get("sku"), Some(&json!("X1")));
        assert_eq!(r.get("bin"), Some(&json!("A-3")));
    }

    #[test]
    fn merge_sets_identifier_when_missing() {
        let mut r = Record::new();
        r.merge(&record(json!({"id": "b"})));
        assert_eq!(r.id(), Some("b"));
    }

    #[test]
    fn serializes_as_plain_object() {
        let r = record(json!({"id": "a", "qty": 2}));
        assert_eq!(serde_json::to_value(&r).unwrap(), json!({"id": "a", "qty": 2}));

        let parsed: std::result::Result<Record, _> = serde_json::from_str("[1]");
        assert!(parsed.is_err());
    }
}
