//! Performance benchmarks for folio-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use folio_engine::{
    aggregate, apply_filters, apply_sorting, evaluate, validate_record, AggregateFunction,
    AggregateSpec, Aggregation, FieldDef, FieldType, FilterOperator, QueryFilter, QuerySpec,
    Record, SchemaDefinition, SortKey,
};
use serde_json::json;

fn invoices(count: usize) -> Vec<Record> {
    let statuses = ["draft", "open", "paid", "void"];
    (0..count)
        .map(|i| {
            let mut record = Record::from_value(json!({
                "number": format!("INV-{:06}", i),
                "vendor": {"name": format!("Vendor {}", i % 37)},
                "status": statuses[i % statuses.len()],
                "total": (i * 7919 % 10_000) as f64 / 4.0,
            }))
            .unwrap_or_default();
            record.set_id(format!("inv_{}", i));
            record
        })
        .collect()
}

fn invoice_schema() -> SchemaDefinition {
    SchemaDefinition::new("ap/invoice", "accounts-payable", 1)
        .with_field(FieldDef::required("number", FieldType::String).with_pattern(r"^INV-\d+$"))
        .with_field(FieldDef::required("vendor.name", FieldType::String))
        .with_field(
            FieldDef::required("status", FieldType::Enum)
                .with_values(["draft", "open", "paid", "void"]),
        )
        .with_field(FieldDef::required("total", FieldType::Currency).with_min(0.0))
}

fn bench_filtering(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtering");

    for size in [100, 1000, 10000] {
        let records = invoices(size);
        let filters = vec![
            QueryFilter::new("status", FilterOperator::In, json!(["open", "paid"])),
            QueryFilter::new("total", FilterOperator::Between, json!([100, 2000])),
        ];

        group.bench_with_input(BenchmarkId::new("apply_filters", size), &size, |b, _| {
            b.iter(|| apply_filters(black_box(records.clone()), black_box(&filters)))
        });
    }

    group.finish();
}

fn bench_sorting(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorting");

    for size in [100, 1000, 10000] {
        let records = invoices(size);
        let keys = vec![SortKey::asc("vendor.name"), SortKey::desc("total")];

        group.bench_with_input(BenchmarkId::new("two_keys", size), &size, |b, _| {
            b.iter(|| apply_sorting(black_box(records.clone()), black_box(&keys)))
        });
    }

    // Full query: filter, sort, page
    let records = invoices(10000);
    let spec = QuerySpec::new()
        .with_filter(QueryFilter::new("status", FilterOperator::Ne, json!("void")))
        .with_order(SortKey::asc("number"))
        .with_offset(100)
        .with_limit(50);
    group.bench_function("evaluate_page", |b| {
        b.iter(|| evaluate(black_box(records.clone()), black_box(&spec)))
    });

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let schema = invoice_schema();
    let records = invoices(1000);

    c.bench_function("validate_1000_records", |b| {
        b.iter(|| {
            for record in &records {
                let _ = black_box(validate_record(record, &schema));
            }
        })
    });
}

fn bench_aggregation(c: &mut Criterion) {
    let records = invoices(10000);
    let spec = AggregateSpec::new()
        .group_by("status")
        .with(Aggregation::count())
        .with(Aggregation::new(AggregateFunction::Sum, "total"))
        .with(Aggregation::new(AggregateFunction::Avg, "total"));

    c.bench_function("aggregate_by_status", |b| {
        b.iter(|| aggregate(black_box(&records), black_box(&spec)))
    });
}

criterion_group!(
    benches,
    bench_filtering,
    bench_sorting,
    bench_validation,
    bench_aggregation,
);

criterion_main!(benches);
