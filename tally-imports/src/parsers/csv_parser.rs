//! Delimited text parser (csv, tsv, txt)

use async_trait::async_trait;
use csv::ReaderBuilder;
use serde_json::{Map, Value};

use super::{unique_headers, vocabulary, DocumentParser, FileInput, ParseError, ParseResult, RawRecord};

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Lines inspected when sniffing the delimiter
const SNIFF_LINES: usize = 10;

pub struct CsvParser;

impl CsvParser {
    pub const ID: &'static str = "csv";
}

#[async_trait]
impl DocumentParser for CsvParser {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv", "tsv", "txt"]
    }

    async fn parse(&self, file: &FileInput) -> ParseResult {
        parse_delimited(&decode_text(&file.bytes))
    }
}

/// Decode as UTF-8 (BOM stripped), falling back to Latin-1 byte mapping
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|b| *b as char).collect(),
    }
}

/// Pick the candidate delimiter that appears most consistently outside quotes
pub(crate) fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    if lines.is_empty() {
        return b',';
    }

    let mut best = (b',', 0usize);
    for delimiter in CANDIDATE_DELIMITERS {
        let counts: Vec<usize> = lines.iter().map(|l| count_unquoted(l, delimiter)).collect();
        let min = counts.iter().copied().min().unwrap_or(0);
        let consistent = counts.iter().all(|c| *c == counts[0]);
        // Consistent counts beat a higher but ragged count
        let score = if consistent { counts[0] * 2 + 1 } else { min * 2 };
        if counts[0] > 0 && score > best.1 {
            best = (delimiter, score);
        }
    }
    best.0
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Parse delimited text with a header row.
///
/// Blank rows are skipped. A row whose field count differs from the header
/// becomes a parse error at that row's index.
pub(crate) fn parse_delimited(text: &str) -> ParseResult {
    let delimiter = sniff_delimiter(text);
    let delimiter_text = (delimiter as char).to_string();
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut result = ParseResult::default();
    result
        .metadata
        .insert("delimiter".into(), Value::String(delimiter_text.clone()));

    let mut rows = reader.records();
    let headers = loop {
        match rows.next() {
            Some(Ok(row)) if row.iter().all(|f| f.trim().is_empty()) => continue,
            Some(Ok(row)) => break unique_headers(row.iter().map(str::to_string)),
            Some(Err(e)) => {
                result.errors.push(ParseError::file(format!("Unreadable header row: {}", e)));
                return result;
            }
            None => return result,
        }
    };

    let mut idx = 0usize;
    for row in rows {
        match row {
            Ok(row) => {
                if row.iter().all(|f| f.trim().is_empty()) {
                    continue;
                }
                if row.len() != headers.len() {
                    result.errors.push(ParseError::row(
                        idx,
                        format!("Expected {} fields, found {}", headers.len(), row.len()),
                        Some(row.iter().collect::<Vec<_>>().join(delimiter_text.as_str())),
                    ));
                } else {
                    let fields: Map<String, Value> = headers
                        .iter()
                        .zip(row.iter())
                        .map(|(h, v)| (h.clone(), Value::String(v.trim().to_string())))
                        .collect();
                    result.records.push(RawRecord { idx, fields });
                }
            }
            Err(e) => {
                result.errors.push(ParseError::row(idx, format!("Malformed row: {}", e), None));
            }
        }
        idx += 1;
    }

    result.detected_doc_type = vocabulary::detect_doc_type(headers.iter().map(String::as_str));
    result
        .metadata
        .insert("columns".into(), Value::from(headers));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use serde_json::json;

    #[test]
    fn test_sniff_delimiters() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n"), b',');
        assert_eq!(sniff_delimiter("a;b;c\n1,5;2;3\n"), b';');
        assert_eq!(sniff_delimiter("a\tb\n1\t2\n"), b'\t');
        assert_eq!(sniff_delimiter("a|b|c\n1|2|3\n"), b'|');
        assert_eq!(sniff_delimiter("\"x,y\";b\n\"1,2\";3\n"), b';');
    }

    #[test]
    fn test_parse_bank_csv() {
        let text = "Fecha,Concepto,Importe,Saldo\n2024-03-01,Nomina,1500.00,2500.00\n\n2024-03-02,Cafe,-3.50,2496.50\n";
        let result = parse_delimited(text);
        assert!(result.errors.is_empty());
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[1].idx, 1);
        assert_eq!(result.records[1].fields["Importe"], json!("-3.50"));
        assert_eq!(result.detected_doc_type, Some(SourceType::Bank));
    }

    #[test]
    fn test_ragged_row_is_parse_error() {
        let text = "a;b\n1;2\n3;4;5\n6;7\n";
        let result = parse_delimited(text);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].idx, Some(1));
        assert_eq!(result.records[1].idx, 2);
        assert_eq!(result.row_count(), 3);
    }

    #[test]
    fn test_latin1_fallback() {
        let bytes = b"Descripci\xf3n,Importe\nCaf\xe9,3\n";
        let text = decode_text(bytes);
        let result = parse_delimited(&text);
        assert_eq!(result.records[0].fields["Descripción"], json!("Café"));
    }

    #[test]
    fn test_empty_input() {
        let result = parse_delimited("");
        assert!(result.records.is_empty());
        assert!(result.errors.is_empty());
    }
}
