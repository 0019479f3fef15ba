//! Parser dispatcher
//!
//! Chooses a parser per upload. The extension is the primary signal; the
//! declared content type and then magic-byte sniffing are consulted only
//! when the extension is missing or unknown. Spreadsheets get a second
//! pass: the first rows are scored against the domain vocabularies and the
//! dominating one selects a specialised parser.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::csv_parser::CsvParser;
use super::json_parser::JsonParser;
use super::ocr::{OcrParser, OcrService, OCR_EXTENSIONS};
use super::sheet::{self, GenericSheetParser, KeywordSheetParser, SPREADSHEET_EXTENSIONS};
use super::vocabulary;
use super::xml_parser::XmlParser;
use super::{DocumentParser, FileInput, ParseResult};
use crate::models::SourceType;

/// Data rows (after the header) scored when picking a spreadsheet parser
pub const SCORING_DATA_ROWS: usize = 10;

/// Types with a specialised spreadsheet parser
const SHEET_VOCABULARIES: [SourceType; 4] = [
    SourceType::Bank,
    SourceType::Invoices,
    SourceType::Expenses,
    SourceType::Products,
];

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("Unknown parser: {0}")]
    UnknownParser(String),

    #[error("Parser {parser} does not accept .{extension} files")]
    IncompatibleExtension { parser: String, extension: String },

    #[error("Unsupported file: {0}")]
    Unsupported(String),
}

/// Broad file family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Spreadsheet,
    Delimited,
    Xml,
    Json,
    Document,
}

impl FileFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            e if SPREADSHEET_EXTENSIONS.contains(&e) => Some(FileFormat::Spreadsheet),
            "csv" | "tsv" | "txt" => Some(FileFormat::Delimited),
            "xml" => Some(FileFormat::Xml),
            "json" => Some(FileFormat::Json),
            e if OCR_EXTENSIONS.contains(&e) => Some(FileFormat::Document),
            _ => None,
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match mime.as_str() {
            "text/csv" | "text/tab-separated-values" | "text/plain" => Some(FileFormat::Delimited),
            "application/xml" | "text/xml" => Some(FileFormat::Xml),
            "application/json" => Some(FileFormat::Json),
            "application/pdf" => Some(FileFormat::Document),
            "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel.sheet.macroenabled.12"
            | "application/vnd.ms-excel.sheet.binary.macroenabled.12"
            | "application/vnd.oasis.opendocument.spreadsheet" => Some(FileFormat::Spreadsheet),
            m if m.starts_with("image/") => Some(FileFormat::Document),
            _ => None,
        }
    }

    /// Canonical extension, used to check parser whitelists for extensionless files
    fn canonical_extension(&self) -> &'static str {
        match self {
            FileFormat::Spreadsheet => "xlsx",
            FileFormat::Delimited => "csv",
            FileFormat::Xml => "xml",
            FileFormat::Json => "json",
            FileFormat::Document => "pdf",
        }
    }
}

/// Detect the file family: extension, then content type, then magic bytes
pub fn detect_format(file: &FileInput) -> Option<FileFormat> {
    if let Some(format) = file.extension().as_deref().and_then(FileFormat::from_extension) {
        return Some(format);
    }
    if let Some(format) = file.content_type.as_deref().and_then(FileFormat::from_mime) {
        return Some(format);
    }
    if let Some(kind) = infer::get(&file.bytes) {
        if let Some(format) = FileFormat::from_mime(kind.mime_type()) {
            return Some(format);
        }
    }
    sniff_text(&file.bytes)
}

fn sniff_text(bytes: &[u8]) -> Option<FileFormat> {
    let text = std::str::from_utf8(bytes).ok()?;
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    match trimmed.chars().next()? {
        '<' => Some(FileFormat::Xml),
        '[' | '{' => Some(FileFormat::Json),
        _ => Some(FileFormat::Delimited),
    }
}

/// Parser choice for one file
#[derive(Debug, Clone, PartialEq)]
pub struct ParserSelection {
    pub parser_id: &'static str,
    pub detected_doc_type: Option<SourceType>,
}

/// All known parsers, keyed by id
pub struct ParserRegistry {
    parsers: BTreeMap<&'static str, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    pub fn new(ocr: Arc<dyn OcrService>) -> Self {
        let mut parsers: BTreeMap<&'static str, Arc<dyn DocumentParser>> = BTreeMap::new();
        let mut add = |p: Arc<dyn DocumentParser>| {
            parsers.insert(p.id(), p);
        };
        add(Arc::new(CsvParser));
        add(Arc::new(XmlParser));
        add(Arc::new(JsonParser));
        add(Arc::new(OcrParser::new(ocr)));
        add(Arc::new(GenericSheetParser));
        for doc_type in SHEET_VOCABULARIES {
            add(Arc::new(KeywordSheetParser::new(doc_type)));
        }
        Self { parsers }
    }

    pub fn get(&self, parser_id: &str) -> Option<Arc<dyn DocumentParser>> {
        self.parsers.get(parser_id).cloned()
    }

    pub fn parser_ids(&self) -> Vec<&'static str> {
        self.parsers.keys().copied().collect()
    }

    /// Choose a parser for a file. `hint` steers spreadsheet selection when
    /// the hinted vocabulary has at least one hit.
    pub fn select_parser(
        &self,
        file: &FileInput,
        hint: Option<SourceType>,
    ) -> Result<ParserSelection, DispatchError> {
        let format = detect_format(file)
            .ok_or_else(|| DispatchError::Unsupported(file.file_name.clone()))?;

        let selection = match format {
            FileFormat::Delimited => ParserSelection {
                parser_id: CsvParser::ID,
                detected_doc_type: None,
            },
            FileFormat::Xml => ParserSelection {
                parser_id: XmlParser::ID,
                detected_doc_type: None,
            },
            FileFormat::Json => ParserSelection {
                parser_id: JsonParser::ID,
                detected_doc_type: None,
            },
            FileFormat::Document => ParserSelection {
                parser_id: OcrParser::ID,
                detected_doc_type: None,
            },
            FileFormat::Spreadsheet => match sheet::load_grid(&file.bytes) {
                Ok(grid) => select_sheet_parser(&sheet::grid_keyword_hits(&grid, SCORING_DATA_ROWS), hint),
                // Let the generic parser report the unreadable workbook
                Err(_) => ParserSelection {
                    parser_id: GenericSheetParser::ID,
                    detected_doc_type: None,
                },
            },
        };

        debug!(
            file = %file.file_name,
            parser = selection.parser_id,
            detected = ?selection.detected_doc_type,
            "Parser selected"
        );
        Ok(selection)
    }

    /// Select and run a parser. Unsupported files yield an empty result
    /// carrying one parse error.
    pub async fn parse(&self, file: &FileInput, hint: Option<SourceType>) -> (Option<ParserSelection>, ParseResult) {
        let selection = match self.select_parser(file, hint) {
            Ok(selection) => selection,
            Err(e) => return (None, ParseResult::failed(e.to_string())),
        };
        match self.parse_with(selection.parser_id, file).await {
            Ok(mut result) => {
                if result.detected_doc_type.is_none() {
                    result.detected_doc_type = selection.detected_doc_type;
                }
                (Some(selection), result)
            }
            Err(e) => (Some(selection), ParseResult::failed(e.to_string())),
        }
    }

    /// Run a specific parser, refusing files outside its extension whitelist
    pub async fn parse_with(&self, parser_id: &str, file: &FileInput) -> Result<ParseResult, DispatchError> {
        let parser = self
            .get(parser_id)
            .ok_or_else(|| DispatchError::UnknownParser(parser_id.to_string()))?;

        let extension = match file.extension() {
            Some(ext) if FileFormat::from_extension(&ext).is_some() => ext,
            _ => detect_format(file)
                .map(|f| f.canonical_extension().to_string())
                .ok_or_else(|| DispatchError::Unsupported(file.file_name.clone()))?,
        };
        if !parser.extensions().contains(&extension.as_str()) {
            return Err(DispatchError::IncompatibleExtension {
                parser: parser_id.to_string(),
                extension,
            });
        }

        Ok(parser.parse(file).await)
    }
}

/// Pick a spreadsheet parser from vocabulary hits
fn select_sheet_parser(hits: &BTreeMap<SourceType, usize>, hint: Option<SourceType>) -> ParserSelection {
    if let Some(hinted) = hint.filter(|h| SHEET_VOCABULARIES.contains(h)) {
        if hits.get(&hinted).copied().unwrap_or(0) > 0 {
            return ParserSelection {
                parser_id: KeywordSheetParser::id_for(hinted),
                detected_doc_type: Some(hinted),
            };
        }
    }

    let restricted: BTreeMap<SourceType, usize> = hits
        .iter()
        .filter(|(t, _)| SHEET_VOCABULARIES.contains(t))
        .map(|(t, n)| (*t, *n))
        .collect();
    match vocabulary::dominant(&restricted) {
        Some(doc_type) => ParserSelection {
            parser_id: KeywordSheetParser::id_for(doc_type),
            detected_doc_type: Some(doc_type),
        },
        None => ParserSelection {
            parser_id: GenericSheetParser::ID,
            detected_doc_type: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::ocr::DisabledOcr;

    fn registry() -> ParserRegistry {
        ParserRegistry::new(Arc::new(DisabledOcr))
    }

    #[test]
    fn test_extension_wins_over_content_type() {
        let file = FileInput::new("rows.csv", b"a,b\n1,2\n".to_vec())
            .with_content_type(Some("application/json".into()));
        assert_eq!(detect_format(&file), Some(FileFormat::Delimited));
    }

    #[test]
    fn test_content_type_then_sniffing() {
        let file = FileInput::new("upload", b"<a/>".to_vec()).with_content_type(Some("text/xml".into()));
        assert_eq!(detect_format(&file), Some(FileFormat::Xml));

        let pdf = FileInput::new("upload", b"%PDF-1.7\n...".to_vec());
        assert_eq!(detect_format(&pdf), Some(FileFormat::Document));

        let json = FileInput::new("upload", b"  [{\"a\":1}]".to_vec());
        assert_eq!(detect_format(&json), Some(FileFormat::Json));
    }

    #[test]
    fn test_sheet_selection_by_vocabulary() {
        let mut hits: BTreeMap<SourceType, usize> = SourceType::SPECIFIC.iter().map(|t| (*t, 0)).collect();
        hits.insert(SourceType::Bank, 3);
        hits.insert(SourceType::Invoices, 1);
        let s = select_sheet_parser(&hits, None);
        assert_eq!(s.parser_id, "sheet_bank");

        // Hint with at least one hit steers the choice
        let s = select_sheet_parser(&hits, Some(SourceType::Invoices));
        assert_eq!(s.parser_id, "sheet_invoices");

        // Hint without hits is ignored
        let s = select_sheet_parser(&hits, Some(SourceType::Products));
        assert_eq!(s.parser_id, "sheet_bank");
    }

    #[test]
    fn test_sheet_tie_falls_back_to_generic() {
        let mut hits: BTreeMap<SourceType, usize> = BTreeMap::new();
        hits.insert(SourceType::Bank, 2);
        hits.insert(SourceType::Products, 2);
        assert_eq!(select_sheet_parser(&hits, None).parser_id, GenericSheetParser::ID);
        assert_eq!(select_sheet_parser(&BTreeMap::new(), None).parser_id, GenericSheetParser::ID);
    }

    #[tokio::test]
    async fn test_incompatible_extension_refused() {
        let file = FileInput::new("statement.csv", b"a,b\n1,2\n".to_vec());
        let err = registry().parse_with("xml", &file).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::IncompatibleExtension {
                parser: "xml".into(),
                extension: "csv".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unsupported_file_gives_empty_result_with_error() {
        let file = FileInput::new("blob.bin", vec![0xff, 0xfe, 0x00, 0x81]);
        let (selection, result) = registry().parse(&file, None).await;
        assert!(selection.is_none());
        assert!(result.records.is_empty());
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_csv_round_through_dispatcher() {
        let file = FileInput::new("bank.csv", b"Fecha;Concepto;Importe;Saldo\n01/03/2024;Nomina;1.500,00;2.500,00\n".to_vec());
        let (selection, result) = registry().parse(&file, None).await;
        assert_eq!(selection.unwrap().parser_id, CsvParser::ID);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.detected_doc_type, Some(SourceType::Bank));
    }
}
