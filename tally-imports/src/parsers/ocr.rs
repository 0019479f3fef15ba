//! OCR-backed parser for PDFs and images
//!
//! Text extraction is an external collaborator behind [`OcrService`]. The
//! parser turns the extracted text into a single record carrying the text,
//! page count and OCR confidence, plus whatever invoice fields can be read
//! off it with patterns.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::{DocumentParser, FileInput, ParseResult, RawRecord};
use crate::mapping::normalize::fold_key;
use crate::models::SourceType;

pub const OCR_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tif", "tiff", "webp"];

/// Text extracted from a document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR service not configured")]
    NotConfigured,

    #[error("OCR request failed: {0}")]
    Http(String),

    #[error("OCR response invalid: {0}")]
    InvalidResponse(String),
}

/// Text extraction collaborator
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn extract(&self, file: &FileInput) -> Result<OcrOutput, OcrError>;
}

/// Placeholder used when no OCR endpoint is configured
pub struct DisabledOcr;

#[async_trait]
impl OcrService for DisabledOcr {
    async fn extract(&self, _file: &FileInput) -> Result<OcrOutput, OcrError> {
        Err(OcrError::NotConfigured)
    }
}

/// OCR over HTTP: POSTs the raw bytes, expects `{text, pages, confidence}`
pub struct HttpOcrService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcrService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl OcrService for HttpOcrService {
    async fn extract(&self, file: &FileInput) -> Result<OcrOutput, OcrError> {
        let content_type = file
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("X-File-Name", file.file_name.as_str())
            .body(file.bytes.clone())
            .send()
            .await
            .map_err(|e| OcrError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OcrError::Http(format!("HTTP {}", response.status())));
        }

        response
            .json::<OcrOutput>()
            .await
            .map_err(|e| OcrError::InvalidResponse(e.to_string()))
    }
}

static INVOICE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:factura|invoice|facture|nota\s+fiscal)\b[^\n\d]{0,20}?(?:n[ºo°.]*|no\.?|number|num(?:ero|éro)?\.?|#)?\s*[:#]?\s*([A-Z0-9]{1,6}[-/]?[0-9][0-9\-/]{2,})",
    )
    .expect("static regex")
});

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4})\b").expect("static regex")
});

static TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:importe\s+)?total(?:\s+(?:a\s+pagar|due|ttc|general|factura))?\s*[:=]?\s*[A-Z$€£]{0,3}\s*(-?[\d.,]+\d)")
        .expect("static regex")
});

static NET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:subtotal|sub-total|base\s+imponible|total\s+ht|net)\s*[:=]?\s*[A-Z$€£]{0,3}\s*(-?[\d.,]+\d)")
        .expect("static regex")
});

static TAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:iva|vat|tva|igv|tax)(?:\s*\(?\d{1,2}(?:[.,]\d+)?\s*%\)?)?\s*[:=]?\s*[A-Z$€£]{0,3}\s*(-?[\d.,]+\d)")
        .expect("static regex")
});

static TAX_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:ruc|nif|cif|rfc|nit|cuit|cnpj|vat(?:\s+(?:no|number|id))?)\b\s*[:.#]?\s*([A-Z0-9][A-Z0-9.\-]{5,})")
        .expect("static regex")
});

static CURRENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(USD|EUR|GBP|MXN|COP|PEN|CLP|ARS|BRL|CAD)\b").expect("static regex"));

/// Pull invoice fields out of free text
pub fn extract_invoice_fields(text: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    let mut put = |key: &str, re: &Regex| {
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            fields.insert(key.to_string(), Value::String(m.as_str().trim().to_string()));
        }
    };
    put("invoice_number", &INVOICE_NUMBER);
    put("invoice_date", &DATE);
    put("net", &NET);
    put("tax", &TAX);
    put("total", &TOTAL);
    put("issuer_tax_id", &TAX_ID);
    put("currency", &CURRENCY);
    fields
}

/// Guess whether OCR text is an invoice or a receipt
pub fn guess_doc_type(text: &str) -> Option<SourceType> {
    let folded = fold_key(text);
    let has = |words: &[&str]| words.iter().any(|w| folded.split('_').any(|t| t == *w));
    if has(&["factura", "invoice", "facture", "fiscal"]) {
        Some(SourceType::Invoices)
    } else if has(&["ticket", "recibo", "receipt", "boleta"]) {
        Some(SourceType::Expenses)
    } else {
        None
    }
}

pub struct OcrParser {
    service: Arc<dyn OcrService>,
}

impl OcrParser {
    pub const ID: &'static str = "ocr";

    pub fn new(service: Arc<dyn OcrService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DocumentParser for OcrParser {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn extensions(&self) -> &'static [&'static str] {
        OCR_EXTENSIONS
    }

    async fn parse(&self, file: &FileInput) -> ParseResult {
        let output = match self.service.extract(file).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "OCR extraction failed");
                return ParseResult::failed(e.to_string());
            }
        };

        let mut fields = extract_invoice_fields(&output.text);
        fields.insert("text".into(), Value::String(output.text.clone()));
        fields.insert("pages".into(), Value::from(output.pages));
        fields.insert("ocr_confidence".into(), Value::from(output.confidence));

        let mut result = ParseResult {
            records: vec![RawRecord { idx: 0, fields }],
            detected_doc_type: guess_doc_type(&output.text),
            ..Default::default()
        };
        result.metadata.insert("pages".into(), Value::from(output.pages));
        result
            .metadata
            .insert("ocr_confidence".into(), Value::from(output.confidence));
        result
    }
}
