//! In-process pattern-matching provider
//!
//! Scores free text with the heuristic vocabulary and adds document-level
//! patterns (invoice header fields, receipt markers) the column-oriented
//! scorer cannot see. No network, no key.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Instant;

use super::provider::{effective_candidates, ClassificationProvider, ProviderError, ProviderTelemetry, TelemetryCounters};
use super::scoring::HeuristicScorer;
use crate::mapping::normalize::fold_key;
use crate::models::{ClassificationResult, SourceType};
use crate::parsers::ocr::{extract_invoice_fields, guess_doc_type};

pub const LOCAL_PROVIDER: &str = "local";

/// Confidence granted when document patterns confirm the vocabulary winner
const PATTERN_CONFIRMED: f64 = 0.85;

pub struct LocalProvider {
    scorer: HeuristicScorer,
    telemetry: TelemetryCounters,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self {
            scorer: HeuristicScorer::default(),
            telemetry: TelemetryCounters::default(),
        }
    }

    fn classify(&self, text: &str, candidates: &[SourceType]) -> ClassificationResult {
        let candidates = effective_candidates(candidates);
        let mut result = self.scorer.score_text(text, &candidates);

        let invoice_fields = extract_invoice_fields(text).len();
        let pattern_type = guess_doc_type(text).filter(|t| candidates.contains(t));

        if let Some(pattern_type) = pattern_type {
            let strong = pattern_type != SourceType::Invoices || invoice_fields >= 3;
            if strong && (pattern_type == result.doc_type || result.confidence < 0.5) {
                result.doc_type = pattern_type;
                result.confidence = result.confidence.max(PATTERN_CONFIRMED);
                result.probabilities.insert(pattern_type, result.confidence);
                result.reasoning = format!(
                    "document patterns indicate {} ({} invoice fields); {}",
                    pattern_type, invoice_fields, result.reasoning
                );
            }
        }

        result.provider = LOCAL_PROVIDER.to_string();
        result.enhanced_by_ai = true;
        result
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// "Field: value" lines whose folded label equals a requested field
fn labelled_values(text: &str, fields: &[String]) -> Map<String, Value> {
    let mut out = Map::new();
    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = fold_key(label);
        if let Some(field) = fields.iter().find(|f| fold_key(f) == label) {
            let value = value.trim();
            if !value.is_empty() && !out.contains_key(field) {
                out.insert(field.clone(), Value::String(value.to_string()));
            }
        }
    }
    out
}

#[async_trait]
impl ClassificationProvider for LocalProvider {
    fn name(&self) -> &str {
        LOCAL_PROVIDER
    }

    async fn classify_document(
        &self,
        text: &str,
        candidates: &[SourceType],
        _metadata: Option<&Map<String, Value>>,
    ) -> Result<ClassificationResult, ProviderError> {
        let started = Instant::now();
        let result = self.classify(text, candidates);
        self.telemetry.record(true, started.elapsed());
        Ok(result)
    }

    async fn extract_fields(
        &self,
        text: &str,
        doc_type: SourceType,
        fields: &[String],
    ) -> Result<Map<String, Value>, ProviderError> {
        let started = Instant::now();
        let mut out = labelled_values(text, fields);
        if doc_type == SourceType::Invoices {
            for (key, value) in extract_invoice_fields(text) {
                if fields.is_empty() || fields.contains(&key) {
                    out.entry(key).or_insert(value);
                }
            }
        }
        self.telemetry.record(true, started.elapsed());
        Ok(out)
    }

    fn get_telemetry(&self) -> ProviderTelemetry {
        self.telemetry.snapshot(LOCAL_PROVIDER)
    }
}
