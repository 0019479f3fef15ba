//! Field-name folding
//!
//! Folding makes "Fecha Emisión", "fecha_emision" and "FECHA-EMISION"
//! compare equal:
//! 1. Transliterate to ASCII via deunicode (accents, ligatures, ñ → n)
//! 2. Lowercase
//! 3. Every run of non-alphanumerics becomes a single `_`
//! 4. Leading/trailing `_` trimmed

use deunicode::deunicode;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Fold a field name (or any short label) to its comparison key
pub fn fold_key(text: &str) -> String {
    let latin = deunicode(text).to_lowercase();
    let mut out = String::with_capacity(latin.len());
    let mut pending_sep = false;
    for ch in latin.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Fold free text into word tokens (for keyword scoring over cell values)
pub fn fold_tokens(text: &str) -> Vec<String> {
    fold_key(text)
        .split('_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Folded field names across records, sorted and de-duplicated
pub fn header_tokens<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut tokens = BTreeSet::new();
    for record in records {
        for key in record.keys() {
            let folded = fold_key(key);
            if !folded.is_empty() {
                tokens.insert(folded);
            }
        }
    }
    tokens.into_iter().collect()
}

/// Render a JSON value as display text (strings unquoted, null empty)
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// True when the value carries no information
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fold_accents_case_whitespace() {
        assert_eq!(fold_key("Fecha Emisión"), "fecha_emision");
        assert_eq!(fold_key("  FECHA-EMISION "), "fecha_emision");
        assert_eq!(fold_key("Nº Factura"), "no_factura");
        assert_eq!(fold_key("Año"), "ano");
    }

    #[test]
    fn test_fold_collapses_separators() {
        assert_eq!(fold_key("Total  (USD)"), "total_usd");
        assert_eq!(fold_key("__x__"), "x");
        assert_eq!(fold_key("---"), "");
    }

    #[test]
    fn test_header_tokens_sorted_unique() {
        let a = json!({"Fecha": 1, "Monto": 2}).as_object().unwrap().clone();
        let b = json!({"fecha": 1, "Saldo": 2}).as_object().unwrap().clone();
        assert_eq!(header_tokens([&a, &b]), vec!["fecha", "monto", "saldo"]);
    }

    #[test]
    fn test_blank_values() {
        assert!(is_blank(&json!("  ")));
        assert!(is_blank(&Value::Null));
        assert!(!is_blank(&json!(0)));
    }
}
