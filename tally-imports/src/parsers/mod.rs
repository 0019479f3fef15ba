//! File parsers and the dispatcher that picks one per upload
//!
//! Every parser turns bytes into a [`ParseResult`]. Malformed rows become
//! [`ParseError`]s attached to the result; a parser never fails the whole
//! file.

pub mod csv_parser;
pub mod dispatcher;
pub mod json_parser;
pub mod ocr;
pub mod sheet;
pub mod vocabulary;
pub mod xml_parser;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::models::SourceType;

pub use dispatcher::{DispatchError, ParserRegistry, ParserSelection};

/// An uploaded file
#[derive(Debug, Clone)]
pub struct FileInput {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FileInput {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Lowercased extension, if the file name has one
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// One raw record with its position in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub idx: usize,
    pub fields: Map<String, Value>,
}

/// A row or region the parser could not turn into a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseError {
    /// Row position sharing the record index space; `None` for file-level errors
    pub idx: Option<usize>,
    pub message: String,
    /// Offending raw content, when available
    pub raw: Option<String>,
}

impl ParseError {
    pub fn row(idx: usize, message: impl Into<String>, raw: Option<String>) -> Self {
        Self {
            idx: Some(idx),
            message: message.into(),
            raw,
        }
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self {
            idx: None,
            message: message.into(),
            raw: None,
        }
    }
}

/// Parser output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseResult {
    pub records: Vec<RawRecord>,
    pub detected_doc_type: Option<SourceType>,
    pub metadata: Map<String, Value>,
    pub errors: Vec<ParseError>,
}

impl ParseResult {
    /// Empty result carrying a single file-level error
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![ParseError::file(message)],
            ..Default::default()
        }
    }

    /// Number of positions (records + row errors) seen in the source
    pub fn row_count(&self) -> usize {
        let max_record = self.records.iter().map(|r| r.idx + 1).max().unwrap_or(0);
        let max_error = self.errors.iter().filter_map(|e| e.idx).map(|i| i + 1).max().unwrap_or(0);
        max_record.max(max_error)
    }

    /// Plain-text rendering of the first records, used as classifier input
    pub fn text_sample(&self, max_records: usize) -> String {
        let mut lines = Vec::new();
        if let Some(first) = self.records.first() {
            lines.push(first.fields.keys().cloned().collect::<Vec<_>>().join(" | "));
        }
        for record in self.records.iter().take(max_records) {
            let values: Vec<String> = record
                .fields
                .values()
                .map(crate::mapping::normalize::value_text)
                .collect();
            lines.push(values.join(" | "));
        }
        lines.join("\n")
    }
}

/// A file format parser
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Stable identifier stored on the batch as `suggested_parser`
    fn id(&self) -> &'static str;

    /// Extensions this parser accepts (lowercase, no dot)
    fn extensions(&self) -> &'static [&'static str];

    /// Document type this parser is specialised for, if any
    fn doc_type(&self) -> Option<SourceType> {
        None
    }

    async fn parse(&self, file: &FileInput) -> ParseResult;
}

/// Give blank or duplicate column headers stable unique names
pub(crate) fn unique_headers<I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen: Vec<String> = Vec::new();
    for (n, name) in raw.into_iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("column_{}", n + 1)
        } else {
            name.trim().to_string()
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while seen.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        seen.push(candidate);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_is_lowercased() {
        let f = FileInput::new("Statement.XLSX", vec![]);
        assert_eq!(f.extension().as_deref(), Some("xlsx"));
        assert_eq!(FileInput::new("README", vec![]).extension(), None);
    }

    #[test]
    fn test_unique_headers() {
        let headers = unique_headers(vec!["Date".into(), "".into(), "Date".into(), " Amount ".into()]);
        assert_eq!(headers, vec!["Date", "column_2", "Date_2", "Amount"]);
    }
}
