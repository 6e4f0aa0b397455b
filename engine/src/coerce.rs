//! Conversion between wire values and canonical cached values.
//!
//! Only date-like columns are converted; everything else passes through.
//! Unknown collections and columns always pass through unchanged.

use crate::schema::{ColumnType, SchemaRegistry};
use crate::value::{Row, Value, DATETIME_FORMAT, DATE_FORMAT};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Convert a raw wire value to its canonical form.
pub fn from_wire(
    registry: &SchemaRegistry,
    collection: &str,
    column: &str,
    value: serde_json::Value,
) -> Value {
    let column_type = registry.column_type(collection, column);
    canonicalize(column_type, Value::from_json(value))
}

/// Convert a canonical value to its wire form.
///
/// Dates serialize as `YYYY-MM-DD` for date columns and
/// `YYYY-MM-DD HH:MM:SS` (UTC) for datetime and timestamp columns. Invalid
/// dates serialize to the empty string.
pub fn to_wire(
    registry: &SchemaRegistry,
    collection: &str,
    column: &str,
    value: &Value,
) -> serde_json::Value {
    match (registry.column_type(collection, column), value) {
        (Some(ColumnType::Date), Value::Date(d)) => d.format(DATE_FORMAT).to_string().into(),
        (Some(ColumnType::Date), Value::DateTime(dt)) => {
            dt.date().format(DATE_FORMAT).to_string().into()
        }
        (Some(t), Value::Date(d)) if t.is_temporal() => d
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.format(DATETIME_FORMAT).to_string())
            .unwrap_or_default()
            .into(),
        (Some(t), Value::DateTime(dt)) if t.is_temporal() => {
            dt.format(DATETIME_FORMAT).to_string().into()
        }
        _ => value.to_json(),
    }
}

/// Convert an already-decoded value to canonical form for a column.
pub fn canonicalize(column_type: Option<ColumnType>, value: Value) -> Value {
    match column_type {
        Some(ColumnType::Date) => match value {
            Value::Text(s) if !s.is_empty() => match parse_date(&s) {
                Some(d) => Value::Date(d),
                None => Value::InvalidDate(s),
            },
            other => other,
        },
        Some(ColumnType::DateTime) | Some(ColumnType::Timestamp) => match value {
            Value::Text(s) if !s.is_empty() => match parse_datetime(&s) {
                Some(dt) => Value::DateTime(dt),
                None => Value::InvalidDate(s),
            },
            Value::Int(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| Value::DateTime(dt.naive_utc()))
                .unwrap_or(Value::InvalidDate(secs.to_string())),
            other => other,
        },
        _ => value,
    }
}

/// Convert a whole wire object to a canonical row.
pub fn row_from_wire(registry: &SchemaRegistry, collection: &str, object: &serde_json::Value) -> Row {
    object
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), from_wire(registry, collection, k, v.clone())))
                .collect()
        })
        .unwrap_or_default()
}

/// Convert a canonical row to a wire object.
pub fn row_to_wire(registry: &SchemaRegistry, collection: &str, row: &Row) -> serde_json::Value {
    serde_json::Value::Object(
        row.iter()
            .map(|(k, v)| (k.clone(), to_wire(registry, collection, k, v)))
            .collect(),
    )
}

/// Canonicalize every value of a locally supplied row by column type.
pub fn canonicalize_row(registry: &SchemaRegistry, collection: &str, row: Row) -> Row {
    row.into_iter()
        .map(|(k, v)| {
            let column_type = registry.column_type(collection, &k);
            (k, canonicalize(column_type, v))
        })
        .collect()
}

/// Expand a partial payload into a row with every known column.
///
/// Missing columns default to the empty string, numeric strings in int
/// columns become numbers, date-like columns are parsed. Fields the schema
/// does not know are dropped and the primary key is left for the caller to
/// stamp. Collections without a schema get the payload back unchanged.
pub fn materialize_defaults(registry: &SchemaRegistry, collection: &str, partial: &Row) -> Row {
    let Some(table) = registry.get(collection) else {
        return partial.clone();
    };

    table
        .data_columns()
        .map(|column| {
            let raw = partial
                .get(&column.name)
                .cloned()
                .unwrap_or_else(|| Value::Text(String::new()));
            let value = match (column.column_type, raw) {
                (ColumnType::Int, Value::Text(s)) => numeric_text(s),
                (column_type, raw) => canonicalize(Some(column_type), raw),
            };
            (column.name.clone(), value)
        })
        .collect()
}

fn numeric_text(s: String) -> Value {
    match s.trim().parse::<i64>() {
        Ok(i) => Value::Int(i),
        Err(_) => Value::Text(s),
    }
}

/// Parse a date, accepting plain dates and datetimes (date part taken).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

/// Parse a datetime in UTC.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, the `T`-separated form, RFC 3339 with an
/// offset (converted to UTC), and a plain date (midnight).
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
