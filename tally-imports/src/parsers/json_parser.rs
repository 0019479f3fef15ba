//! JSON records parser
//!
//! Accepts a top-level array of objects, or an object holding such an array
//! under `records`, `items`, `data` or `rows`. Non-object entries become
//! parse errors at their position.

use async_trait::async_trait;
use serde_json::Value;

use super::{vocabulary, DocumentParser, FileInput, ParseError, ParseResult, RawRecord};

const ENVELOPE_KEYS: &[&str] = &["records", "items", "data", "rows"];

pub struct JsonParser;

impl JsonParser {
    pub const ID: &'static str = "json";
}

#[async_trait]
impl DocumentParser for JsonParser {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    async fn parse(&self, file: &FileInput) -> ParseResult {
        parse_json(&file.bytes)
    }
}

pub(crate) fn parse_json(bytes: &[u8]) -> ParseResult {
    let document: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => return ParseResult::failed(format!("Invalid JSON: {}", e)),
    };

    let entries = match document {
        Value::Array(entries) => entries,
        Value::Object(mut object) => {
            match ENVELOPE_KEYS.iter().find_map(|k| match object.remove(*k) {
                Some(Value::Array(a)) => Some(a),
                _ => None,
            }) {
                Some(entries) => entries,
                None => vec![Value::Object(object)],
            }
        }
        _ => return ParseResult::failed("JSON document holds no records"),
    };

    let mut result = ParseResult::default();
    for (idx, entry) in entries.into_iter().enumerate() {
        match entry {
            Value::Object(fields) => result.records.push(RawRecord { idx, fields }),
            other => result.errors.push(ParseError::row(
                idx,
                "Expected an object",
                Some(other.to_string()),
            )),
        }
    }

    let headers: Vec<String> = result
        .records
        .iter()
        .take(10)
        .flat_map(|r| r.fields.keys().cloned())
        .collect();
    result.detected_doc_type = vocabulary::detect_doc_type(headers.iter().map(String::as_str));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_and_envelope() {
        let a = parse_json(br#"[{"sku":"A1","price":"2"},{"sku":"B2","price":"3"}]"#);
        assert_eq!(a.records.len(), 2);
        assert_eq!(a.detected_doc_type, Some(crate::models::SourceType::Products));

        let b = parse_json(br#"{"items":[{"x":1}, 5]}"#);
        assert_eq!(b.records.len(), 1);
        assert_eq!(b.errors.len(), 1);
        assert_eq!(b.errors[0].idx, Some(1));
    }

    #[test]
    fn test_invalid_json() {
        let r = parse_json(b"{oops");
        assert!(r.records.is_empty());
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].idx, None);
    }
}
