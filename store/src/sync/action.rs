//! Replayable write actions.

use crate::adapter::{ImportMode, RecordPatch, StorageAdapter};
use crate::error::Result;
use folio_engine::{CollectionName, Record, RecordId};
use serde::{Deserialize, Serialize};

/// A write mirrored to the remote adapter, carrying the exact arguments
/// needed to replay it against any adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncAction {
    Insert {
        collection: CollectionName,
        record: Record,
    },
    Update {
        collection: CollectionName,
        id: RecordId,
        patch: Record,
    },
    Upsert {
        collection: CollectionName,
        record: Record,
    },
    Remove {
        collection: CollectionName,
        id: RecordId,
    },
    BulkInsert {
        collection: CollectionName,
        records: Vec<Record>,
    },
    BulkUpdate {
        collection: CollectionName,
        updates: Vec<RecordPatch>,
    },
    BulkRemove {
        collection: CollectionName,
        ids: Vec<RecordId>,
    },
    Clear {
        collection: CollectionName,
    },
    ImportCollection {
        collection: CollectionName,
        records: Vec<Record>,
        mode: ImportMode,
    },
}

impl SyncAction {
    /// Collection the action writes to.
    pub fn collection(&self) -> &str {
        match self {
            SyncAction::Insert { collection, .. }
            | SyncAction::Update { collection, .. }
            | SyncAction::Upsert { collection, .. }
            | SyncAction::Remove { collection, .. }
            | SyncAction::BulkInsert { collection, .. }
            | SyncAction::BulkUpdate { collection, .. }
            | SyncAction::BulkRemove { collection, .. }
            | SyncAction::Clear { collection }
            | SyncAction::ImportCollection { collection, .. } => collection,
        }
    }

    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncAction::Insert { .. } => "insert",
            SyncAction::Update { .. } => "update",
            SyncAction::Upsert { .. } => "upsert",
            SyncAction::Remove { .. } => "remove",
            SyncAction::BulkInsert { .. } => "bulk-insert",
            SyncAction::BulkUpdate { .. } => "bulk-update",
            SyncAction::BulkRemove { .. } => "bulk-remove",
            SyncAction::Clear { .. } => "clear",
            SyncAction::ImportCollection { .. } => "import-collection",
        }
    }

    /// Apply the action to `adapter`.
    pub async fn replay(&self, adapter: &dyn StorageAdapter) -> Result<()> {
        match self {
            SyncAction::Insert { collection, record } => {
                adapter.insert(collection, record.clone()).await?;
            }
            SyncAction::Update {
                collection,
                id,
                patch,
            } => {
                adapter.update(collection, id, patch.clone()).await?;
            }
            SyncAction::Upsert { collection, record } => {
                adapter.upsert(collection, record.clone()).await?;
            }
            SyncAction::Remove { collection, id } => {
                adapter.remove(collection, id).await?;
            }
            SyncAction::BulkInsert {
                collection,
                records,
            } => {
                adapter.bulk_insert(collection, records.clone(), None).await?;
            }
            SyncAction::BulkUpdate {
                collection,
                updates,
            } => {
                adapter.bulk_update(collection, updates.clone(), None).await?;
            }
            SyncAction::BulkRemove { collection, ids } => {
                adapter.bulk_remove(collection, ids.clone(), None).await?;
            }
            SyncAction::Clear { collection } => adapter.clear(collection).await?,
            SyncAction::ImportCollection {
                collection,
                records,
                mode,
            } => {
                adapter.import(collection, records.clone(), *mode).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::KeyValueAdapter;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn serialized_with_type_tag() {
        let action = SyncAction::BulkRemove {
            collection: "ap/invoice".into(),
            ids: vec!["a".into(), "b".into()],
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({"type": "bulk-remove", "collection": "ap/invoice", "ids": ["a", "b"]})
        );
        assert_eq!(action.kind(), "bulk-remove");

        let import: SyncAction = serde_json::from_value(json!({
            "type": "import-collection",
            "collection": "inv/item",
            "records": [{"id": "x"}],
            "mode": "replace"
        }))
        .unwrap();
        assert_eq!(import.collection(), "inv/item");
        assert_eq!(import.kind(), "import-collection");
    }

    #[tokio::test]
    async fn replays_against_any_adapter() {
        let kv = KeyValueAdapter::in_memory();
        let actions = vec![
            SyncAction::Insert {
                collection: "c".into(),
                record: record(json!({"id": "a", "n": 1})),
            },
            SyncAction::Update {
                collection: "c".into(),
                id: "a".into(),
                patch: record(json!({"n": 2})),
            },
            SyncAction::BulkInsert {
                collection: "c".into(),
                records: vec![record(json!({"id": "b"})), record(json!({"id": "c"}))],
            },
            SyncAction::Remove {
                collection: "c".into(),
                id: "b".into(),
            },
        ];
        for action in &actions {
            action.replay(&kv).await.unwrap();
        }

        let all = kv.get_all("c").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], record(json!({"id": "a", "n": 2})));

        SyncAction::Clear {
            collection: "c".into(),
        }
        .replay(&kv)
        .await
        .unwrap();
        assert!(kv.get_all("c").await.unwrap().is_empty());
    }
}
