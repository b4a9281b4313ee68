//! Query evaluation: filters, multi-key sorting, pagination and aggregation.
//!
//! Everything here is a pure function over records. Adapters that cannot push
//! a query down to their backend load the collection and call [`evaluate`],
//! which keeps filter and ordering semantics identical across backends.

use crate::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Comparison operator of a [`QueryFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "starts-with")]
    StartsWith,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "is-null")]
    IsNull,
    #[serde(rename = "is-not-null")]
    IsNotNull,
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::Gte => ">=",
            FilterOperator::Lte => "<=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "starts-with",
            FilterOperator::Between => "between",
            FilterOperator::IsNull => "is-null",
            FilterOperator::IsNotNull => "is-not-null",
        };
        f.write_str(symbol)
    }
}

/// A single `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    /// Field path, dotted for nested values
    pub field: String,
    /// Operator
    pub operator: FilterOperator,
    /// Operand; ignored by `is-null` / `is-not-null`
    #[serde(default)]
    pub value: Value,
}

impl QueryFilter {
    /// Create a filter.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// `field is null`
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, Value::Null)
    }

    /// `field is not null`
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, Value::Null)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One key of a multi-key ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    /// Ascending key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A compiled query: filters, ordering and pagination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    #[serde(default)]
    pub order_by: Vec<SortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl QuerySpec {
    /// An unrestricted query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add a filter.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Builder-style method to add a sort key.
    pub fn with_order(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    /// Builder-style method to set the limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder-style method to set the offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Test one record against one filter.
pub fn matches_filter(record: &Record, filter: &QueryFilter) -> bool {
    let actual = record.resolve(&filter.field);
    let expected = &filter.value;

    match filter.operator {
        FilterOperator::Eq => actual == Some(expected),
        FilterOperator::Ne => actual != Some(expected),
        FilterOperator::Gt => compare_numeric(actual, expected, |a, b| a > b),
        FilterOperator::Lt => compare_numeric(actual, expected, |a, b| a < b),
        FilterOperator::Gte => compare_numeric(actual, expected, |a, b| a >= b),
        FilterOperator::Lte => compare_numeric(actual, expected, |a, b| a <= b),
        FilterOperator::In => match expected {
            Value::Array(candidates) => actual.is_some_and(|v| candidates.contains(v)),
            _ => false,
        },
        FilterOperator::NotIn => match expected {
            Value::Array(candidates) => !actual.is_some_and(|v| candidates.contains(v)),
            _ => false,
        },
        FilterOperator::Contains => match (actual, expected) {
            (Some(Value::String(haystack)), Value::String(needle)) => {
                haystack.contains(needle.as_str())
            }
            _ => false,
        },
        FilterOperator::StartsWith => match (actual, expected) {
            (Some(Value::String(haystack)), Value::String(prefix)) => {
                haystack.starts_with(prefix.as_str())
            }
            _ => false,
        },
        FilterOperator::Between => match expected {
            Value::Array(bounds) if bounds.len() == 2 => {
                match (
                    to_number(actual),
                    to_number(Some(&bounds[0])),
                    to_number(Some(&bounds[1])),
                ) {
                    (Some(v), Some(low), Some(high)) => v >= low && v <= high,
                    _ => false,
                }
            }
            _ => false,
        },
        FilterOperator::IsNull => actual.map_or(true, Value::is_null),
        FilterOperator::IsNotNull => actual.is_some_and(|v| !v.is_null()),
    }
}

fn compare_numeric(actual: Option<&Value>, expected: &Value, op: fn(f64, f64) -> bool) -> bool {
    match (to_number(actual), to_number(Some(expected))) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// Numeric coercion used by comparisons and aggregation.
///
/// Numbers pass through; strings are trimmed and parsed (empty means 0);
/// booleans are 1/0; null is 0. Absent values, arrays, objects and
/// non-numeric strings do not coerce.
pub fn to_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// `true` when the record satisfies every filter.
pub fn matches_all(record: &Record, filters: &[QueryFilter]) -> bool {
    filters.iter().all(|f| matches_filter(record, f))
}

/// Keep the records matching every filter, preserving order.
pub fn apply_filters(records: Vec<Record>, filters: &[QueryFilter]) -> Vec<Record> {
    if filters.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| matches_all(r, filters))
        .collect()
}

/// Order records by the given keys. The sort is stable, so records that
/// compare equal on every key keep their input order.
pub fn apply_sorting(mut records: Vec<Record>, keys: &[SortKey]) -> Vec<Record> {
    if keys.is_empty() {
        return records;
    }
    records.sort_by(|a, b| compare_records(a, b, keys));
    records
}

/// Compare two records lexicographically over the sort keys.
pub fn compare_records(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare_sort_values(a.resolve(&key.field), b.resolve(&key.field), key.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compare two sort-key values.
///
/// Missing and null values are absent. Absent sorts before present values
/// when ascending and after them when descending.
pub fn compare_sort_values(
    a: Option<&Value>,
    b: Option<&Value>,
    direction: SortDirection,
) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => match direction {
            SortDirection::Asc => Ordering::Less,
            SortDirection::Desc => Ordering::Greater,
        },
        (Some(_), None) => match direction {
            SortDirection::Asc => Ordering::Greater,
            SortDirection::Desc => Ordering::Less,
        },
        (Some(a), Some(b)) => {
            let ord = compare_present(a, b);
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    }
}

fn compare_present(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => locale_compare(x, y),
        _ => display_string(a).cmp(&display_string(b)),
    }
}

/// Multi-level collation approximating the default collation of a UI locale.
///
/// Strings are compared on their base letters first (canonical decomposition
/// with combining marks removed, case folded), then with accents
/// (unaccented first), then by case (lowercase first):
/// `"apple" < "Banana" < "école" < "folder"`, `"e" < "é"` and `"a" < "A"`.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    base_letters(a)
        .cmp(base_letters(b))
        .then_with(|| accented_letters(a).cmp(accented_letters(b)))
        .then_with(|| b.cmp(a))
}

fn base_letters(s: &str) -> impl Iterator<Item = char> + '_ {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
}

fn accented_letters(s: &str) -> impl Iterator<Item = char> + '_ {
    s.nfd().flat_map(char::to_lowercase)
}

/// String conversion used when ordering values of mixed or non-scalar type.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| if v.is_null() { String::new() } else { display_string(v) })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Skip `offset` records and keep at most `limit`.
pub fn apply_pagination(
    records: Vec<Record>,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Vec<Record> {
    let offset = offset.unwrap_or(0);
    match limit {
        Some(limit) => records.into_iter().skip(offset).take(limit).collect(),
        None => records.into_iter().skip(offset).collect(),
    }
}

/// Run a full query: filter, then sort, then paginate.
pub fn evaluate(records: Vec<Record>, spec: &QuerySpec) -> Vec<Record> {
    let filtered = apply_filters(records, &spec.filters);
    let sorted = apply_sorting(filtered, &spec.order_by);
    apply_pagination(sorted, spec.offset, spec.limit)
}

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateFunction::Sum => write!(f, "sum"),
            AggregateFunction::Avg => write!(f, "avg"),
            AggregateFunction::Min => write!(f, "min"),
            AggregateFunction::Max => write!(f, "max"),
            AggregateFunction::Count => write!(f, "count"),
        }
    }
}

/// One aggregate column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub function: AggregateFunction,
    /// Field to aggregate; `count` without a field counts records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Output column name; defaults to `<function>_<field>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Aggregation {
    /// Aggregate a field.
    pub fn new(function: AggregateFunction, field: impl Into<String>) -> Self {
        Self {
            function,
            field: Some(field.into()),
            alias: None,
        }
    }

    /// Count records.
    pub fn count() -> Self {
        Self {
            function: AggregateFunction::Count,
            field: None,
            alias: None,
        }
    }

    /// Builder-style method to set the output name.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output column name.
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.field) {
            (Some(alias), _) => alias.clone(),
            (None, Some(field)) => format!("{}_{}", self.function, field),
            (None, None) => self.function.to_string(),
        }
    }
}

/// Group-by aggregation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    /// Applied before grouping
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
}

impl AggregateSpec {
    /// Empty spec (a single group over every record, no columns).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add a group-by field.
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    /// Builder-style method to add a column.
    pub fn with(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Builder-style method to add a pre-filter.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// One output row of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    /// Group-by field values (null when absent)
    pub group: Map<String, Value>,
    /// Aggregate values by output name
    pub values: Map<String, Value>,
}

/// Group records and compute aggregate columns.
///
/// Groups appear in the order their first record appears. Without group-by
/// fields there is exactly one row, even for an empty input.
pub fn aggregate(records: &[Record], spec: &AggregateSpec) -> Vec<AggregateRow> {
    let matching: Vec<&Record> = records
        .iter()
        .filter(|r| matches_all(r, &spec.filters))
        .collect();

    let mut groups: Vec<(Vec<Value>, Vec<&Record>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    if spec.group_by.is_empty() {
        groups.push((Vec::new(), matching));
    } else {
        for record in matching {
            let key: Vec<Value> = spec
                .group_by
                .iter()
                .map(|field| record.resolve(field).cloned().unwrap_or(Value::Null))
                .collect();
            let signature = serde_json::to_string(&key).unwrap_or_default();
            match index.get(&signature) {
                Some(&i) => groups[i].1.push(record),
                None => {
                    index.insert(signature, groups.len());
                    groups.push((key, vec![record]));
                }
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let group = spec.group_by.iter().cloned().zip(key).collect();
            let values = spec
                .aggregations
                .iter()
                .map(|agg| (agg.output_name(), compute(agg, &members)))
                .collect();
            AggregateRow { group, values }
        })
        .collect()
}

fn compute(aggregation: &Aggregation, members: &[&Record]) -> Value {
    let present: Vec<&Value> = match &aggregation.field {
        Some(field) => members
            .iter()
            .filter_map(|r| r.resolve(field))
            .filter(|v| !v.is_null())
            .collect(),
        None => Vec::new(),
    };

    if aggregation.function == AggregateFunction::Count {
        return match aggregation.field {
            Some(_) => Value::from(present.len()),
            None => Value::from(members.len()),
        };
    }

    let numbers: Vec<f64> = present.iter().filter_map(|v| to_number(Some(v))).collect();
    match aggregation.function {
        AggregateFunction::Sum => number_value(numbers.iter().sum()),
        AggregateFunction::Avg if numbers.is_empty() => Value::Null,
        AggregateFunction::Avg => number_value(numbers.iter().sum::<f64>() / numbers.len() as f64),
        AggregateFunction::Min => numbers
            .iter()
            .copied()
            .reduce(f64::min)
            .map_or(Value::Null, number_value),
        AggregateFunction::Max => numbers
            .iter()
            .copied()
            .reduce(f64::max)
            .map_or(Value::Null, number_value),
        AggregateFunction::Count => Value::Null,
    }
}

/// Integral results become JSON integers so `30.0` reads back as `30`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
