//! JSON record flattening
//!
//! Turns an array of (possibly nested) JSON objects into a [`Table`].
//! Nested object keys are joined with `.`, so
//! `{"location": {"street": {"id": 1}}}` becomes a `location.street.id`
//! column. Columns appear in first-seen order across all records; a key
//! missing from a record yields `Null` in that row.

use crime_common::{EtlError, Result, Table, Value};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;

/// Separator between nested key segments
pub const PATH_SEPARATOR: char = '.';

/// Flatten a JSON payload that must be an array of objects
pub fn flatten_records(payload: &Json) -> Result<Table> {
    let records = payload.as_array().ok_or_else(|| {
        EtlError::network(format!(
            "expected a JSON array of records, got {}",
            json_kind(payload)
        ))
    })?;

    let mut columns: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut flat_rows: Vec<Vec<(usize, Value)>> = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let object = record.as_object().ok_or_else(|| {
            EtlError::network(format!(
                "record {} is a JSON {}, expected an object",
                index,
                json_kind(record)
            ))
        })?;

        let mut cells = Vec::new();
        flatten_object(None, object, &mut |path, value| {
            let position = *positions.entry(path.clone()).or_insert_with(|| {
                columns.push(path);
                columns.len() - 1
            });
            cells.push((position, value));
        });
        flat_rows.push(cells);
    }

    let mut table = Table::with_columns(columns.clone());
    for cells in flat_rows {
        let mut row = vec![Value::Null; columns.len()];
        for (position, value) in cells {
            row[position] = value;
        }
        table.push_row(row)?;
    }

    Ok(table)
}

fn flatten_object(
    prefix: Option<&str>,
    object: &Map<String, Json>,
    emit: &mut dyn FnMut(String, Value),
) {
    for (key, value) in object {
        let path = match prefix {
            Some(p) => format!("{}{}{}", p, PATH_SEPARATOR, key),
            None => key.clone(),
        };
        match value {
            Json::Object(inner) => flatten_object(Some(&path), inner, emit),
            other => emit(path, scalar(other)),
        }
    }
}

fn scalar(value: &Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        Json::String(s) => Value::Text(s.clone()),
        // Arrays are kept whole, as their JSON text
        Json::Array(_) => Value::Text(value.to_string()),
        Json::Object(_) => Value::Text(value.to_string()),
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_keys_become_dotted_columns() {
        let payload = json!([{
            "category": "burglary",
            "location": {
                "latitude": "51.5",
                "street": {"id": 883345, "name": "On or near High Street"}
            },
            "month": "2023-01"
        }]);

        let table = flatten_records(&payload).unwrap();
        assert_eq!(
            table.columns(),
            &[
                "category",
                "location.latitude",
                "location.street.id",
                "location.street.name",
                "month"
            ]
        );
        assert_eq!(
            table.column("location.street.id").unwrap(),
            vec![&Value::Int(883345)]
        );
    }

    #[test]
    fn test_missing_keys_are_null() {
        let payload = json!([
            {"id": 1, "outcome_status": {"category": "Under investigation"}},
            {"id": 2, "outcome_status": null}
        ]);

        let table = flatten_records(&payload).unwrap();
        assert_eq!(table.columns(), &["id", "outcome_status.category", "outcome_status"]);
        assert_eq!(
            table.rows()[0],
            vec![Value::Int(1), Value::from("Under investigation"), Value::Null]
        );
        assert_eq!(table.rows()[1], vec![Value::Int(2), Value::Null, Value::Null]);
    }

    #[test]
    fn test_arrays_and_floats() {
        let payload = json!([{"score": 1.5, "tags": ["a", "b"]}]);
        let table = flatten_records(&payload).unwrap();
        assert_eq!(table.columns(), &["score", "tags"]);
        assert_eq!(
            table.rows()[0],
            vec![Value::Float(1.5), Value::from(r#"["a","b"]"#)]
        );
    }

    #[test]
    fn test_empty_array_gives_empty_table() {
        let table = flatten_records(&json!([])).unwrap();
        assert!(table.is_empty());
        assert!(table.columns().is_empty());
    }

    #[test]
    fn test_non_array_payload_is_network_error() {
        let err = flatten_records(&json!({"error": "too many"})).unwrap_err();
        assert!(matches!(err, EtlError::Network(_)));

        let err = flatten_records(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, EtlError::Network(_)));
    }
}
