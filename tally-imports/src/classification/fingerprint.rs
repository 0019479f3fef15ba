//! Content shape fingerprint
//!
//! Two files with the same columns and the same kind of values in them get
//! the same fingerprint regardless of the actual values, so feedback on one
//! export can be matched to the next export from the same system.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tally_common::hash::sha256_parts;

use crate::mapping::normalize::{fold_key, is_blank};
use crate::mapping::values::{is_date_like, parse_amount};

/// Records sampled when determining a column's value kind
const SAMPLE_RECORDS: usize = 10;

/// Coarse value kind used in fingerprints
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        _ if is_blank(value) => "empty",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        _ if is_date_like(value) => "date",
        _ if parse_amount(value).is_some() => "number",
        _ => "text",
    }
}

/// SHA-256 over the sorted (folded field name, value kind) pairs
pub fn content_fingerprint<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut shape: BTreeMap<String, &'static str> = BTreeMap::new();
    for record in records.into_iter().take(SAMPLE_RECORDS) {
        for (key, value) in record {
            let kind = value_kind(value);
            let entry = shape.entry(fold_key(key)).or_insert("empty");
            if *entry == "empty" {
                *entry = kind;
            }
        }
    }
    sha256_parts(shape.iter().map(|(k, v)| format!("{}:{}", k, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_same_shape_same_fingerprint() {
        let a = [obj(json!({"Fecha": "01/02/2024", "Importe": "10,00"}))];
        let b = [obj(json!({"importe": "99", "FECHA": "2023-12-31"}))];
        assert_eq!(content_fingerprint(a.iter()), content_fingerprint(b.iter()));
    }

    #[test]
    fn test_kind_change_changes_fingerprint() {
        let a = [obj(json!({"Fecha": "01/02/2024"}))];
        let b = [obj(json!({"Fecha": "pending"}))];
        assert_ne!(content_fingerprint(a.iter()), content_fingerprint(b.iter()));
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(value_kind(&json!("")), "empty");
        assert_eq!(value_kind(&json!("1.234,50")), "number");
        assert_eq!(value_kind(&json!("15 de marzo de 2024")), "date");
        assert_eq!(value_kind(&json!("Cafe")), "text");
    }
}
