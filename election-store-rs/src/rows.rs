//! Row materialization: SQLite values into ordered JSON objects.

use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};

/// Result of one executed query: ordered column names plus one JSON object
/// per row. Row objects preserve the SELECT's column order.
#[derive(Debug, Clone)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryRows {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Convert a borrowed SQLite value into JSON. Non-finite floats (NaN from a
/// division by zero aggregate) become null, matching the JSON data model.
pub fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            // Blobs never occur in this dataset; degrade to a length marker
            // rather than dropping the column.
            Value::String(format!("<blob {} bytes>", bytes.len()))
        }
    }
}
