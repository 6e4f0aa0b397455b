//! Decoding of backend read responses.
//!
//! A collection read answers in columnar form:
//!
//! ```text
//! {"student": {"columns": ["id", "name"], "records": [[1, "Ann"], [2, "Bo"]]}}
//! ```
//!
//! A single-row read answers with a plain object.

use crate::coerce::{from_wire, row_from_wire};
use crate::{schema::SchemaRegistry, RecordId, Row};

/// Decode a collection read into `(id, row)` pairs, in response order.
///
/// Rows are keyed by the collection's primary key from `registry`, falling
/// back to `fallback_primary_key`. Rows without a usable id are skipped,
/// and unrecognized response shapes decode to nothing.
pub fn decode_list(
    registry: &SchemaRegistry,
    collection: &str,
    fallback_primary_key: &str,
    response: &serde_json::Value,
) -> Vec<(RecordId, Row)> {
    let Some(body) = response.get(collection) else {
        return Vec::new();
    };
    let (Some(columns), Some(records)) = (
        body.get("columns").and_then(|c| c.as_array()),
        body.get("records").and_then(|r| r.as_array()),
    ) else {
        return Vec::new();
    };

    // positions are kept so values stay aligned past a malformed column name
    let columns: Vec<Option<&str>> = columns.iter().map(|c| c.as_str()).collect();
    let primary_key = registry
        .primary_key(collection)
        .unwrap_or(fallback_primary_key);

    records
        .iter()
        .filter_map(|record| record.as_array())
        .filter_map(|values| {
            let row: Row = columns
                .iter()
                .zip(values)
                .filter_map(|(column, value)| {
                    let column = (*column)?;
                    Some((
                        column.to_string(),
                        from_wire(registry, collection, column, value.clone()),
                    ))
                })
                .collect();
            let id = row.get(primary_key)?.as_id()?;
            Some((id, row))
        })
        .collect()
}

/// Decode a single-row read. Non-object responses decode to `None`.
pub fn decode_row(
    registry: &SchemaRegistry,
    collection: &str,
    response: &serde_json::Value,
) -> Option<Row> {
    response.is_object().then(|| row_from_wire(registry, collection, response))
}
