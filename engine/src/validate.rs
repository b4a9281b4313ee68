//! Field and record validation against a schema.
//!
//! Validation reports human-readable messages; it never mutates the record.
//! The only `Err` is a malformed schema (a pattern that does not compile, an
//! enum without values).

use crate::{error::Result, Error, FieldDef, FieldType, Record, SchemaDefinition};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Validate one field value.
///
/// `value` is `None` when the field is missing. A null value counts as
/// missing. `record` is the whole record when validating at record level and
/// is handed to custom validators.
pub fn validate_field(
    value: Option<&Value>,
    field: &FieldDef,
    record: Option<&Record>,
) -> Result<Vec<String>> {
    let value = match value {
        None | Some(Value::Null) if field.required => {
            return Ok(vec![format!("{} is required", field.name)])
        }
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(v) => v,
    };

    if let Some(message) = type_error(value, field)? {
        return Ok(vec![message]);
    }

    let mut errors = Vec::new();
    check_bounds(value, field, &mut errors);

    if let (Some(pattern), Value::String(s)) = (&field.pattern, value) {
        let regex = regex_lite::Regex::new(pattern).map_err(|e| {
            Error::invalid_schema(
                field.name.clone(),
                format!("invalid pattern '{}': {}", pattern, e),
            )
        })?;
        if !regex.is_match(s) {
            errors.push(format!("{} does not match the required pattern", field.name));
        }
    }

    for validator in &field.validators {
        if let Some(message) = validator(value, field, record) {
            errors.push(message);
        }
    }

    Ok(errors)
}

/// Validate a record against every declared field, then against the
/// schema's record-level validators.
///
/// Returns the deduplicated union of all messages, in the order found. An
/// empty list means the record is valid.
pub fn validate_record(record: &Record, schema: &SchemaDefinition) -> Result<Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    for field in &schema.fields {
        for message in validate_field(record.resolve(&field.name), field, Some(record))? {
            if !errors.contains(&message) {
                errors.push(message);
            }
        }
    }

    for validator in &schema.validators {
        if let Some(message) = validator(record) {
            if !errors.contains(&message) {
                errors.push(message);
            }
        }
    }

    Ok(errors)
}

fn type_error(value: &Value, field: &FieldDef) -> Result<Option<String>> {
    let name = &field.name;
    let message = match field.field_type {
        FieldType::String if !value.is_string() => Some(format!("{name} must be a string")),
        FieldType::Number | FieldType::Currency | FieldType::Percentage if !value.is_number() => {
            Some(format!("{name} must be a number"))
        }
        FieldType::Boolean if !value.is_boolean() => Some(format!("{name} must be a boolean")),
        FieldType::Date if !is_valid_date(value) => Some(format!("{name} must be a valid date")),
        FieldType::Id if !value.as_str().is_some_and(|s| !s.trim().is_empty()) => {
            Some(format!("{name} must be a non-empty identifier"))
        }
        FieldType::Enum => {
            let allowed = field
                .values
                .as_deref()
                .filter(|values| !values.is_empty())
                .ok_or_else(|| {
                    Error::invalid_schema(name.clone(), "enum field declares no values")
                })?;
            match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => None,
                _ => Some(format!("{name} must be one of: {}", allowed.join(", "))),
            }
        }
        FieldType::Array if !value.is_array() => Some(format!("{name} must be an array")),
        FieldType::Object if !value.is_object() => Some(format!("{name} must be an object")),
        _ => None,
    };
    Ok(message)
}

fn check_bounds(value: &Value, field: &FieldDef, errors: &mut Vec<String>) {
    let name = &field.name;
    match value {
        Value::Number(n) => {
            let Some(n) = n.as_f64() else { return };
            if let Some(min) = field.min.filter(|min| n < *min) {
                errors.push(format!("{name} is below the minimum of {min}"));
            }
            if let Some(max) = field.max.filter(|max| n > *max) {
                errors.push(format!("{name} is above the maximum of {max}"));
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as f64;
            if let Some(min) = field.min.filter(|min| len < *min) {
                errors.push(format!("{name} must be at least {min} characters"));
            }
            if let Some(max) = field.max.filter(|max| len > *max) {
                errors.push(format!("{name} must be at most {max} characters"));
            }
        }
        Value::Array(items) => {
            let len = items.len() as f64;
            if let Some(min) = field.min.filter(|min| len < *min) {
                errors.push(format!("{name} must contain at least {min} items"));
            }
            if let Some(max) = field.max.filter(|max| len > *max) {
                errors.push(format!("{name} must contain at most {max} items"));
            }
        }
        _ => {}
    }
}

/// Accepts RFC 3339 timestamps, `YYYY-MM-DD` dates, naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` date-times and integer epoch milliseconds.
pub fn is_valid_date(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            DateTime::parse_from_rfc3339(s).is_ok()
                || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        }
        Value::Number(n) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}
