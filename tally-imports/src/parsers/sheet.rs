//! Spreadsheet parsers (xlsx, xlsm, xls, xlsb, ods) on top of calamine
//!
//! The first worksheet is read into a grid of JSON cells. The header row is
//! not assumed to be the first row: exports commonly start with a title,
//! an account summary or blank lines, so each of the first rows is scored
//! and the best one wins.

use async_trait::async_trait;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;

use super::{unique_headers, vocabulary, DocumentParser, FileInput, ParseResult, RawRecord};
use crate::mapping::normalize::{is_blank, value_text};
use crate::mapping::values::{is_date_like, parse_amount};
use crate::models::SourceType;

/// Rows considered as header candidates
const HEADER_SCAN_ROWS: usize = 20;

pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

pub type Grid = Vec<Vec<Value>>;

/// Read the first worksheet into a grid, keeping leading blank rows/columns
pub fn load_grid(bytes: &[u8]) -> Result<Grid, String> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| format!("Could not open workbook: {}", e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "Workbook has no worksheets".to_string())?
        .map_err(|e| format!("Could not read first worksheet: {}", e))?;

    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut grid: Grid = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![Value::Null; col_offset];
        cells.extend(row.iter().map(cell_value));
        grid.push(cells);
    }
    Ok(grid)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                Value::from(*f as i64)
            } else {
                Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::String(s.trim().to_string()),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) if ndt.time() == chrono::NaiveTime::MIN => {
                Value::String(ndt.date().format("%Y-%m-%d").to_string())
            }
            Some(ndt) => Value::String(ndt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => Value::Null,
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

fn row_is_blank(row: &[Value]) -> bool {
    row.iter().all(is_blank)
}

/// Score candidate header rows; the highest wins, ties go to the earliest.
///
/// Signals: fill ratio, distinctness of labels, share of textual (non-date,
/// non-numeric) cells, a blank row right above, and vocabulary hits (for a
/// given type, or any type when `vocabulary_for` is `None`).
pub fn detect_header_row(grid: &Grid, vocabulary_for: Option<SourceType>) -> Option<usize> {
    let scan = grid.len().min(HEADER_SCAN_ROWS);
    let width = grid.iter().take(scan).map(|r| r.len()).max().unwrap_or(0);
    if width == 0 {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for (i, row) in grid.iter().enumerate().take(scan) {
        let filled: Vec<&Value> = row.iter().filter(|v| !is_blank(v)).collect();
        if filled.is_empty() {
            continue;
        }
        let texts: Vec<String> = filled.iter().map(|v| value_text(v)).collect();
        let textual = filled
            .iter()
            .filter(|v| v.is_string() && !is_date_like(v) && parse_amount(v).is_none())
            .count();
        let distinct = texts.iter().collect::<HashSet<_>>().len();

        let fill_ratio = filled.len() as f64 / width as f64;
        let distinct_ratio = distinct as f64 / filled.len() as f64;
        let text_ratio = textual as f64 / filled.len() as f64;
        let blank_above = if i == 0 {
            0.25
        } else if row_is_blank(&grid[i - 1]) {
            0.5
        } else {
            0.0
        };
        let hits = vocabulary::keyword_hits(texts.iter().map(String::as_str));
        let keyword_bonus = match vocabulary_for {
            Some(t) => hits.get(&t).copied().unwrap_or(0),
            None => hits.values().copied().max().unwrap_or(0),
        } as f64
            * 0.5;
        // A lone title cell is not a header
        let single_cell_penalty = if filled.len() < 2 { 2.0 } else { 0.0 };

        let score = fill_ratio + distinct_ratio + 1.5 * text_ratio + blank_above + keyword_bonus
            - single_cell_penalty;
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Header names at `header_row`
pub fn headers_at(grid: &Grid, header_row: usize) -> Vec<String> {
    grid.get(header_row)
        .map(|row| unique_headers(row.iter().map(value_text)))
        .unwrap_or_default()
}

/// Build records from the rows below `header_row` (blank rows skipped)
pub fn records_below(grid: &Grid, header_row: usize) -> Vec<RawRecord> {
    let headers = headers_at(grid, header_row);
    let mut records = Vec::new();
    let mut idx = 0usize;
    for row in grid.iter().skip(header_row + 1) {
        if row_is_blank(row) {
            continue;
        }
        let fields: Map<String, Value> = headers
            .iter()
            .enumerate()
            .map(|(c, h)| (h.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
            .collect();
        records.push(RawRecord { idx, fields });
        idx += 1;
    }
    records
}

/// Vocabulary hits over the detected header row and the first `data_rows`
/// non-blank rows beneath it
pub fn grid_keyword_hits(grid: &Grid, data_rows: usize) -> BTreeMap<SourceType, usize> {
    let header = detect_header_row(grid, None).unwrap_or(0);
    let texts: Vec<String> = grid
        .iter()
        .skip(header)
        .filter(|row| !row_is_blank(row))
        .take(data_rows + 1)
        .flat_map(|row| row.iter().filter(|v| v.is_string()).map(value_text))
        .collect();
    vocabulary::keyword_hits(texts.iter().map(String::as_str))
}

fn grid_to_result(grid: &Grid, doc_type: Option<SourceType>, parser_id: &str) -> ParseResult {
    let mut result = ParseResult::default();
    let Some(header_row) = detect_header_row(grid, doc_type) else {
        result.metadata.insert("parser".into(), Value::from(parser_id));
        return result;
    };
    let headers = headers_at(grid, header_row);
    result.records = records_below(grid, header_row);
    result.detected_doc_type =
        doc_type.or_else(|| vocabulary::detect_doc_type(headers.iter().map(String::as_str)));
    result.metadata.insert("parser".into(), Value::from(parser_id));
    result.metadata.insert("header_row".into(), Value::from(header_row));
    result.metadata.insert("columns".into(), Value::from(headers));
    result
}

async fn parse_workbook(file: &FileInput, doc_type: Option<SourceType>, parser_id: &'static str) -> ParseResult {
    let bytes = file.bytes.clone();
    match tokio::task::spawn_blocking(move || load_grid(&bytes)).await {
        Ok(Ok(grid)) => grid_to_result(&grid, doc_type, parser_id),
        Ok(Err(message)) => ParseResult::failed(message),
        Err(e) => ParseResult::failed(format!("Workbook parsing aborted: {}", e)),
    }
}

/// Spreadsheet parser specialised for one vocabulary
pub struct KeywordSheetParser {
    doc_type: SourceType,
}

impl KeywordSheetParser {
    pub fn new(doc_type: SourceType) -> Self {
        Self { doc_type }
    }

    pub fn id_for(doc_type: SourceType) -> &'static str {
        match doc_type {
            SourceType::Bank => "sheet_bank",
            SourceType::Invoices => "sheet_invoices",
            SourceType::Expenses => "sheet_expenses",
            SourceType::Products => "sheet_products",
            SourceType::Recipes => "sheet_recipes",
            SourceType::Generic => GenericSheetParser::ID,
        }
    }
}

#[async_trait]
impl DocumentParser for KeywordSheetParser {
    fn id(&self) -> &'static str {
        Self::id_for(self.doc_type)
    }

    fn extensions(&self) -> &'static [&'static str] {
        SPREADSHEET_EXTENSIONS
    }

    fn doc_type(&self) -> Option<SourceType> {
        Some(self.doc_type)
    }

    async fn parse(&self, file: &FileInput) -> ParseResult {
        parse_workbook(file, Some(self.doc_type), self.id()).await
    }
}

/// Structure-inferring spreadsheet parser
pub struct GenericSheetParser;

impl GenericSheetParser {
    pub const ID: &'static str = "sheet_generic";
}

#[async_trait]
impl DocumentParser for GenericSheetParser {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn extensions(&self) -> &'static [&'static str] {
        SPREADSHEET_EXTENSIONS
    }

    async fn parse(&self, file: &FileInput) -> ParseResult {
        parse_workbook(file, None, Self::ID).await
    }
}
