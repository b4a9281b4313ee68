//! Whole-store export bundle.
//!
//! The bundle is a flat JSON object mapping collection names to record lists,
//! annotated with the bundle format version and the schema version each
//! collection was written at:
//!
//! ```json
//! { "__version": 1, "__schemaVersions": { "inv/item": 2 }, "inv/item": [ ... ] }
//! ```
//!
//! Collections are kept in a `BTreeMap` so serialization order is stable.

use crate::{error::Result, CollectionName, Error, Record, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current bundle format version.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Prefix reserved for bundle annotations.
pub const RESERVED_PREFIX: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Format version; absent in bundles written before versioning
    #[serde(rename = "__version", default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<u32>,
    /// Schema version of each exported collection
    #[serde(rename = "__schemaVersions", default)]
    pub schema_versions: BTreeMap<CollectionName, SchemaVersion>,
    /// Records by collection
    #[serde(flatten)]
    pub collections: BTreeMap<CollectionName, Vec<Record>>,
}

impl ExportBundle {
    /// Create an empty bundle at the current format version.
    pub fn new() -> Self {
        Self {
            format_version: Some(BUNDLE_FORMAT_VERSION),
            ..Self::default()
        }
    }

    /// Add (or replace) a collection.
    pub fn add_collection(
        &mut self,
        collection: impl Into<CollectionName>,
        records: Vec<Record>,
        schema_version: Option<SchemaVersion>,
    ) {
        let collection = collection.into();
        if let Some(version) = schema_version {
            self.schema_versions.insert(collection.clone(), version);
        }
        self.collections.insert(collection, records);
    }

    /// Records of one collection.
    pub fn records(&self, collection: &str) -> Option<&[Record]> {
        self.collections.get(collection).map(Vec::as_slice)
    }

    /// Schema version a collection was exported at.
    pub fn schema_version(&self, collection: &str) -> Option<SchemaVersion> {
        self.schema_versions.get(collection).copied()
    }

    /// Total records across all collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidBundle(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidBundle(e.to_string()))
    }

    /// Parse a bundle and bring it up to the current format.
    pub fn from_json(json: &str) -> Result<Self> {
        let bundle: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidBundle(e.to_string()))?;
        bundle.upgrade()
    }

    /// Format migration hook.
    ///
    /// Unversioned bundles are plain collection maps and are read as
    /// version 1. Bundles from a newer format are rejected. Keys using the
    /// reserved prefix are never treated as collections.
    pub fn upgrade(mut self) -> Result<Self> {
        let version = self.format_version.unwrap_or(BUNDLE_FORMAT_VERSION);
        if version == 0 || version > BUNDLE_FORMAT_VERSION {
            return Err(Error::InvalidBundle(format!(
                "unsupported bundle format version {} (supported: {})",
                version, BUNDLE_FORMAT_VERSION
            )));
        }

        if let Some(reserved) = self
            .collections
            .keys()
            .find(|name| name.starts_with(RESERVED_PREFIX))
        {
            return Err(Error::InvalidBundle(format!(
                "reserved key '{}' cannot be a collection",
                reserved
            )));
        }

        self.schema_versions
            .retain(|collection, _| self.collections.contains_key(collection));
        self.format_version = Some(BUNDLE_FORMAT_VERSION);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn serializes_as_flat_object() {
        let mut bundle = ExportBundle::new();
        bundle.add_collection(
            "inv/item",
            vec![record(json!({"id": "a", "sku": "X1"}))],
            Some(2),
        );
        bundle.add_collection("notes", vec![], None);

        let value: Value = serde_json::from_str(&bundle.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "__version": 1,
                "__schemaVersions": {"inv/item": 2},
                "inv/item": [{"id": "a", "sku": "X1"}],
                "notes": []
            })
        );
        assert_eq!(bundle.record_count(), 1);
    }

    #[test]
    fn parses_back() {
        let mut bundle = ExportBundle::new();
        bundle.add_collection("ap/vendor", vec![record(json!({"id": "v1"}))], Some(1));
        let parsed = ExportBundle::from_json(&bundle.to_json_pretty().unwrap()).unwrap();
        assert_eq!(parsed, bundle);
        assert_eq!(parsed.schema_version("ap/vendor"), Some(1));
    }

    #[test]
    fn unversioned_bundle_is_upgraded() {
        let parsed = ExportBundle::from_json(r#"{"inv/item": [{"id": "a"}]}"#).unwrap();
        assert_eq!(parsed.format_version, Some(BUNDLE_FORMAT_VERSION));
        assert_eq!(parsed.records("inv/item").unwrap().len(), 1);
        assert!(parsed.schema_versions.is_empty());
    }

    #[test]
    fn future_format_is_rejected() {
        let err = ExportBundle::from_json(r#"{"__version": 9, "x": []}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidBundle(msg) if msg.contains("version 9")));
    }

    #[test]
    fn malformed_bundles_are_rejected() {
        assert!(ExportBundle::from_json(r#"{"x": {"id": "a"}}"#).is_err());
        assert!(ExportBundle::from_json(r#"{"x": [1, 2]}"#).is_err());
        assert!(ExportBundle::from_json(r#"{"__extra": []}"#).is_err());
    }

    #[test]
    fn stale_schema_versions_are_dropped() {
        let parsed =
            ExportBundle::from_json(r#"{"__version": 1, "__schemaVersions": {"gone": 3}, "x": []}"#)
                .unwrap();
        assert!(parsed.schema_versions.is_empty());
    }
}
