//! Collection write paths, events and relation enforcement.

mod common;

use common::{ids, item_schema, payables_registry, record};
use folio_engine::{
    AggregateSpec, Aggregation, CascadePolicy, ComputedField, FieldDef, FieldType, FilterOperator,
    QueryFilter, RelationDef, SchemaDefinition,
};
use folio_store::{ErrorKind, EventKind, RecordPatch, Store, StoreError};
use serde_json::json;

#[tokio::test]
async fn inventory_item_example() {
    let store = Store::builder().schema(item_schema()).open().await.unwrap();
    let (_, mut events) = store.events().subscribe();
    let items = store.collection("inv/item").unwrap();

    let err = items
        .insert(record(json!({"sku": "X1", "unitCost": -5})))
        .await
        .unwrap_err();
    let messages = err.validation_errors().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("minimum"));
    assert!(items.get_all().await.unwrap().is_empty());
    assert!(events.try_recv().is_err());

    let stored = items
        .insert(record(json!({"sku": "X1", "unitCost": 10})))
        .await
        .unwrap();
    let id = stored.id().unwrap().to_string();
    assert!(!id.is_empty());

    let event = events.try_recv().unwrap();
    assert_eq!(event.name(), "inv/item.created");
    assert_eq!(event.record, stored);
    assert_eq!(event.record.id(), Some(id.as_str()));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn update_and_upsert() {
    let store = Store::builder().schema(item_schema()).open().await.unwrap();
    let items = store.collection("inv/item").unwrap();
    let (_, mut events) = store.events().subscribe_collection("inv/item");

    let stored = items
        .insert(record(json!({"id": "i1", "sku": "A", "unitCost": 1})))
        .await
        .unwrap();
    let updated = items
        .update("i1", record(json!({"id": "other", "unitCost": 2})))
        .await
        .unwrap();
    assert_eq!(updated.id(), Some("i1"));
    assert_eq!(updated.get("sku"), stored.get("sku"));
    assert_eq!(updated.get("unitCost"), Some(&json!(2)));

    let err = items
        .update("i1", record(json!({"unitCost": -1})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        items.require("i1").await.unwrap().get("unitCost"),
        Some(&json!(2))
    );

    let missing = items.update("nope", record(json!({}))).await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    items
        .upsert(record(json!({"id": "i1", "qty": 4})))
        .await
        .unwrap();
    items
        .upsert(record(json!({"id": "i2", "sku": "B", "unitCost": 3})))
        .await
        .unwrap();
    assert_eq!(items.count(&[]).await.unwrap(), 2);

    let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        [
            EventKind::Created,
            EventKind::Updated,
            EventKind::Updated,
            EventKind::Created
        ]
    );
}

#[tokio::test]
async fn computed_fields_fill_on_write() {
    let schema = item_schema().with_computed(ComputedField::new("value", |r| {
        let cost = r.get("unitCost").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let qty = r.get("qty").and_then(|v| v.as_f64()).unwrap_or(0.0);
        json!(cost * qty)
    }));
    let store = Store::builder().schema(schema).open().await.unwrap();
    let items = store.collection("inv/item").unwrap();

    let stored = items
        .insert(record(json!({"sku": "A", "unitCost": 2.5, "qty": 4})))
        .await
        .unwrap();
    assert_eq!(stored.get("value"), Some(&json!(10.0)));

    let id = stored.id().unwrap();
    let updated = items.update(id, record(json!({"qty": 2}))).await.unwrap();
    assert_eq!(updated.get("value"), Some(&json!(5.0)));
}

#[tokio::test]
async fn bulk_operations_emit_per_record() {
    let store = Store::builder().schema(item_schema()).open().await.unwrap();
    let items = store.collection("inv/item").unwrap();
    let (_, mut events) = store.events().subscribe();

    let stored = items
        .bulk_insert(
            (0..3)
                .map(|i| record(json!({"sku": format!("S{i}"), "unitCost": i})))
                .collect(),
            None,
        )
        .await
        .unwrap();
    let item_ids = ids(&stored);

    let updates = item_ids
        .iter()
        .map(|id| RecordPatch::new(id.clone(), record(json!({"qty": 1}))))
        .collect();
    let updated = items.bulk_update(updates, None).await.unwrap();
    assert!(updated.iter().all(|r| r.get("qty") == Some(&json!(1))));

    let removed = items
        .bulk_remove(vec![item_ids[0].clone(), "missing".into()], None)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Created).count(), 3);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Updated).count(), 3);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Removed).count(), 1);
}

#[tokio::test]
async fn queries_and_aggregates() {
    let store = Store::builder().schema(item_schema()).open().await.unwrap();
    let items = store.collection("inv/item").unwrap();
    for (sku, cost, qty) in [("A", 5, 1), ("B", 1, 3), ("C", 3, 0)] {
        items
            .insert(record(json!({"sku": sku, "unitCost": cost, "qty": qty})))
            .await
            .unwrap();
    }

    let cheap = items
        .query()
        .filter("unitCost", FilterOperator::Lt, json!(5))
        .order_by("unitCost", folio_engine::SortDirection::Asc)
        .execute()
        .await
        .unwrap();
    let skus: Vec<_> = cheap.iter().filter_map(|r| r.get("sku")).collect();
    assert_eq!(skus, [&json!("B"), &json!("C")]);

    let stocked = items
        .count(&[QueryFilter::new("qty", FilterOperator::Gt, json!(0))])
        .await
        .unwrap();
    assert_eq!(stocked, 2);

    let rows = items
        .aggregate(
            &AggregateSpec::new()
                .with(Aggregation::new(folio_engine::AggregateFunction::Sum, "qty"))
                .with(Aggregation::count()),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values.get("sum_qty"), Some(&json!(4)));
    assert_eq!(rows[0].values.get("count"), Some(&json!(3)));
}

#[tokio::test]
async fn restrict_blocks_removal() {
    let store = Store::builder()
        .registry(payables_registry())
        .open()
        .await
        .unwrap();
    let vendors = store.collection("ap/vendor").unwrap();
    let invoices = store.collection("ap/invoice").unwrap();

    vendors
        .insert(record(json!({"id": "v1", "name": "Acme"})))
        .await
        .unwrap();
    invoices
        .insert(record(json!({"number": "INV-1", "vendorId": "v1"})))
        .await
        .unwrap();

    let err = vendors.remove("v1").await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    assert!(vendors.get("v1").await.unwrap().is_some());
}

#[tokio::test]
async fn cascade_and_nullify() {
    let store = Store::builder()
        .registry(payables_registry())
        .open()
        .await
        .unwrap();
    let vendors = store.collection("ap/vendor").unwrap();
    let bills = store.collection("ap/bill").unwrap();
    let lines = store.collection("ap/bill-line").unwrap();
    let payments = store.collection("ap/payment").unwrap();

    vendors
        .insert(record(json!({"id": "v1", "name": "Acme"})))
        .await
        .unwrap();
    vendors
        .insert(record(json!({"id": "v2", "name": "Globex"})))
        .await
        .unwrap();
    bills
        .insert(record(json!({"id": "b1", "amount": 10, "vendorId": "v1"})))
        .await
        .unwrap();
    bills
        .insert(record(json!({"id": "b2", "amount": 20, "vendorId": "v2"})))
        .await
        .unwrap();
    lines
        .insert(record(json!({"id": "l1", "billId": "b1"})))
        .await
        .unwrap();
    payments
        .insert(record(json!({"id": "p1", "amount": 10, "vendorId": "v1"})))
        .await
        .unwrap();

    let (_, mut events) = store.events().subscribe();
    assert!(vendors.remove("v1").await.unwrap());

    assert_eq!(ids(&bills.get_all().await.unwrap()), ["b2"]);
    assert!(lines.get_all().await.unwrap().is_empty());
    let payment = payments.require("p1").await.unwrap();
    assert_eq!(payment.get("vendorId"), Some(&json!(null)));

    let mut names: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.name())
        .collect();
    names.sort();
    assert_eq!(
        names,
        [
            "ap/bill-line.removed",
            "ap/bill.removed",
            "ap/payment.updated",
            "ap/vendor.removed"
        ]
    );
}

#[tokio::test]
async fn remove_missing_is_false() {
    let store = Store::builder().schema(item_schema()).open().await.unwrap();
    let items = store.collection("inv/item").unwrap();
    assert!(!items.remove("nothing").await.unwrap());
}

#[tokio::test]
async fn self_referential_cascade_counts_only_roots() {
    let schema = SchemaDefinition::new("org/unit", "organization", 1)
        .with_field(FieldDef::required("name", FieldType::String))
        .with_field(FieldDef::optional("parentId", FieldType::Id))
        .with_relation(RelationDef::belongs_to(
            "parentId",
            "org/unit",
            CascadePolicy::Cascade,
        ));
    let store = Store::builder().schema(schema).open().await.unwrap();
    let units = store.collection("org/unit").unwrap();

    for unit in [
        json!({"id": "root", "name": "Head office"}),
        json!({"id": "branch", "name": "Branch", "parentId": "root"}),
        json!({"id": "desk", "name": "Desk", "parentId": "branch"}),
        json!({"id": "other", "name": "Other office"}),
    ] {
        units.insert(record(unit)).await.unwrap();
    }

    let (_, mut events) = store.events().subscribe();
    let removed = units.bulk_remove(vec!["root".into()], None).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(ids(&units.get_all().await.unwrap()), ["other"]);

    let mut removed_ids: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| e.kind == EventKind::Removed)
        .filter_map(|e| e.record.id().map(String::from))
        .collect();
    removed_ids.sort();
    assert_eq!(removed_ids, ["branch", "desk", "root"]);
}
