//! Dedupe hashes and idempotency keys
//!
//! - Dedupe hash: identity of the business document an item describes.
//!   Not unique by itself; only one PROMOTED item per tenant may carry a
//!   given hash.
//! - Idempotency key: identity of the source position (tenant, file, row).
//!   Unique per tenant, so re-ingesting a file cannot duplicate items.

use serde_json::{Map, Value};
use tally_common::hash::sha256_parts;

use crate::mapping::normalize::{fold_key, is_blank, value_text};
use crate::mapping::values::{amount_key, parse_date};
use crate::models::SourceType;
use crate::validation::gate::{amount_fields, date_fields};

/// Ordered key fields per source type
pub fn default_dedupe_keys(source_type: SourceType) -> &'static [&'static str] {
    match source_type {
        SourceType::Invoices => &["issuer_tax_id", "invoice_number", "invoice_date", "total"],
        SourceType::Bank => &["date", "amount", "description", "reference"],
        SourceType::Expenses => &["vendor_tax_id", "date", "amount", "description"],
        SourceType::Products => &["sku", "barcode", "name"],
        SourceType::Recipes => &["name"],
        SourceType::Generic => &[],
    }
}

/// Canonical text of one key value: amounts to 2 decimals, dates to ISO,
/// text folded so case and accents do not split duplicates
fn key_value(source_type: SourceType, field: &str, value: Option<&Value>) -> String {
    let Some(value) = value.filter(|v| !is_blank(v)) else {
        return String::new();
    };
    if amount_fields(source_type).contains(&field) {
        if let Some(key) = amount_key(value) {
            return key;
        }
    }
    if date_fields(source_type).contains(&field) {
        if let Some(date) = parse_date(value) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    fold_key(&value_text(value))
}

/// Hash the key tuple of a merged record. `explicit_keys` (a Mapping's
/// `dedupe_keys`) replaces the source-type default when non-empty; generic
/// records use every field in name order. Returns `None` when every key
/// value is empty.
pub fn dedupe_hash(source_type: SourceType, merged: &Map<String, Value>, explicit_keys: &[String]) -> Option<String> {
    let keys: Vec<String> = if !explicit_keys.is_empty() {
        explicit_keys.to_vec()
    } else if source_type == SourceType::Generic {
        let mut all: Vec<String> = merged.keys().cloned().collect();
        all.sort();
        all
    } else {
        default_dedupe_keys(source_type).iter().map(|k| k.to_string()).collect()
    };

    let values: Vec<String> = keys
        .iter()
        .map(|k| key_value(source_type, k, merged.get(k)))
        .collect();
    if values.iter().all(String::is_empty) {
        return None;
    }

    let mut parts = vec![source_type.as_str().to_string()];
    for (key, value) in keys.iter().zip(values) {
        parts.push(key.clone());
        parts.push(value);
    }
    Some(sha256_parts(parts))
}

/// Stable key for (tenant, source file, row position)
pub fn idempotency_key(tenant_id: &str, file_key: &str, idx: i64) -> String {
    sha256_parts([tenant_id, file_key, &idx.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_same_document_same_hash_across_formats() {
        let a = obj(json!({"issuer_tax_id": "1790012345001", "invoice_number": "F-1", "invoice_date": "15/03/2024", "total": "112"}));
        let b = obj(json!({"issuer_tax_id": "1790012345001", "invoice_number": "f-1", "invoice_date": "2024-03-15", "total": "112,00", "note": "x"}));
        assert_eq!(dedupe_hash(SourceType::Invoices, &a, &[]), dedupe_hash(SourceType::Invoices, &b, &[]));
    }

    #[test]
    fn test_different_total_different_hash() {
        let a = obj(json!({"invoice_number": "F-1", "total": "112"}));
        let b = obj(json!({"invoice_number": "F-1", "total": "113"}));
        assert_ne!(dedupe_hash(SourceType::Invoices, &a, &[]), dedupe_hash(SourceType::Invoices, &b, &[]));
    }

    #[test]
    fn test_explicit_keys_override() {
        let a = obj(json!({"sku": "A1", "name": "Soap"}));
        let b = obj(json!({"sku": "A1", "name": "Soap bar"}));
        assert_ne!(dedupe_hash(SourceType::Products, &a, &[]), dedupe_hash(SourceType::Products, &b, &[]));
        let keys = vec!["sku".to_string()];
        assert_eq!(dedupe_hash(SourceType::Products, &a, &keys), dedupe_hash(SourceType::Products, &b, &keys));
    }

    #[test]
    fn test_no_hash_without_key_values() {
        assert_eq!(dedupe_hash(SourceType::Bank, &obj(json!({"other": "x"})), &[]), None);
        assert!(dedupe_hash(SourceType::Generic, &obj(json!({"other": "x"})), &[]).is_some());
    }

    #[test]
    fn test_idempotency_key_stable_per_position() {
        assert_eq!(idempotency_key("t1", "f.csv", 2), idempotency_key("t1", "f.csv", 2));
        assert_ne!(idempotency_key("t1", "f.csv", 2), idempotency_key("t1", "f.csv", 3));
        assert_ne!(idempotency_key("t1", "f.csv", 2), idempotency_key("t2", "f.csv", 2));
    }
}
