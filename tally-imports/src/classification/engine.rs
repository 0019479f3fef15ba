//! Classification engine: heuristic first, AI escalation when unsure
//!
//! **Escalation rules:**
//! 1. Score with the heuristic scorer
//! 2. Confidence at or above the threshold, or no provider → done
//! 3. Otherwise ask the provider under a timeout and the caller's
//!    cancellation token
//! 4. Adopt the provider's answer only when its confidence is strictly
//!    higher; errors, timeouts and cancellation keep the heuristic result
//!    with the reason appended
//!
//! The final confidence is therefore never below the heuristic's.
//!
//! Field extraction for OCR text follows the same policy: the provider is
//! asked under the timeout and cancellation token, and any failure simply
//! yields no extra fields.

use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tally_common::hash::sha256_parts;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fingerprint::content_fingerprint;
use super::provider::{ClassificationProvider, ProviderError, ProviderTelemetry};
use super::scoring::{HeuristicScorer, ScoringWeights};
use crate::mapping::normalize::{fold_tokens, is_blank, value_text};
use crate::models::{ClassificationResult, SourceType};
use crate::parsers::ParseResult;

/// Records rendered into the provider prompt
const TEXT_SAMPLE_RECORDS: usize = 20;

/// What the engine classifies: structured records, free text, or both
#[derive(Debug, Clone, Default)]
pub struct ClassificationInput {
    pub records: Vec<Map<String, Value>>,
    pub text: String,
    pub metadata: Option<Map<String, Value>>,
}

impl ClassificationInput {
    /// Build from parser output. OCR output (a single record carrying the
    /// page text) is classified as text.
    pub fn from_parse(parsed: &ParseResult) -> Self {
        let metadata = (!parsed.metadata.is_empty()).then(|| parsed.metadata.clone());
        if parsed.metadata.contains_key("ocr_confidence") {
            let text = parsed
                .records
                .first()
                .and_then(|r| r.fields.get("text"))
                .map(value_text)
                .unwrap_or_default();
            return Self {
                records: Vec::new(),
                text,
                metadata,
            };
        }
        Self {
            records: parsed.records.iter().map(|r| r.fields.clone()).collect(),
            text: parsed.text_sample(TEXT_SAMPLE_RECORDS),
            metadata,
        }
    }

    /// Build from rows posted through the API
    pub fn from_rows(rows: &[Map<String, Value>]) -> Self {
        let parsed = ParseResult {
            records: rows
                .iter()
                .enumerate()
                .map(|(idx, fields)| crate::parsers::RawRecord {
                    idx,
                    fields: fields.clone(),
                })
                .collect(),
            ..Default::default()
        };
        Self::from_parse(&parsed)
    }

    fn fingerprint(&self) -> String {
        if self.records.is_empty() {
            let mut tokens = fold_tokens(&self.text);
            tokens.sort();
            tokens.dedup();
            sha256_parts(tokens)
        } else {
            content_fingerprint(self.records.iter())
        }
    }
}

pub struct ClassificationEngine {
    scorer: RwLock<Arc<HeuristicScorer>>,
    provider: Option<Arc<dyn ClassificationProvider>>,
    threshold: f64,
    timeout: Duration,
}

impl ClassificationEngine {
    pub fn new(
        weights: ScoringWeights,
        provider: Option<Arc<dyn ClassificationProvider>>,
        threshold: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            scorer: RwLock::new(Arc::new(HeuristicScorer::new(weights))),
            provider,
            threshold,
            timeout,
        }
    }

    /// Heuristic-only engine with built-in weights
    pub fn heuristic_only() -> Self {
        Self::new(ScoringWeights::defaults(), None, 0.7, Duration::from_secs(8))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn scorer(&self) -> Arc<HeuristicScorer> {
        self.scorer.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn weights(&self) -> ScoringWeights {
        self.scorer().weights().clone()
    }

    /// Swap the active weights (retraining, snapshot pinning)
    pub fn set_weights(&self, weights: ScoringWeights) {
        let version = weights.version;
        *self.scorer.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(HeuristicScorer::new(weights));
        info!(version, "Heuristic weights activated");
    }

    pub fn provider_telemetry(&self) -> Option<ProviderTelemetry> {
        self.provider.as_ref().map(|p| p.get_telemetry())
    }

    /// Heuristic score only, no escalation
    pub fn score(&self, input: &ClassificationInput, candidates: &[SourceType]) -> ClassificationResult {
        let scorer = self.scorer();
        let mut result = if input.records.is_empty() {
            scorer.score_text(&input.text, candidates)
        } else {
            let refs: Vec<&Map<String, Value>> = input.records.iter().collect();
            scorer.score_records(&refs, candidates)
        };
        result.fingerprint = Some(input.fingerprint());
        result
    }

    pub async fn classify(
        &self,
        input: &ClassificationInput,
        candidates: &[SourceType],
        cancel: &CancellationToken,
    ) -> ClassificationResult {
        let mut heuristic = self.score(input, candidates);

        let Some(provider) = self.provider.as_ref() else {
            return heuristic;
        };
        if heuristic.confidence >= self.threshold {
            debug!(
                doc_type = %heuristic.doc_type,
                confidence = heuristic.confidence,
                "Heuristic confident, no escalation"
            );
            return heuristic;
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            answer = tokio::time::timeout(
                self.timeout,
                provider.classify_document(&input.text, candidates, input.metadata.as_ref()),
            ) => answer.unwrap_or(Err(ProviderError::Timeout(timeout_ms))),
        };

        match outcome {
            Ok(mut ai) if ai.confidence > heuristic.confidence => {
                info!(
                    provider = provider.name(),
                    doc_type = %ai.doc_type,
                    confidence = ai.confidence,
                    heuristic_confidence = heuristic.confidence,
                    "AI classification adopted"
                );
                ai.enhanced_by_ai = true;
                ai.fingerprint = heuristic.fingerprint.take();
                if ai.provider.is_empty() {
                    ai.provider = provider.name().to_string();
                }
                ai
            }
            Ok(ai) => {
                debug!(
                    provider = provider.name(),
                    ai_confidence = ai.confidence,
                    heuristic_confidence = heuristic.confidence,
                    "AI answer not more confident, keeping heuristic"
                );
                heuristic.reasoning.push_str(&format!(
                    "; {} suggested {} at {:.2}, not above heuristic",
                    provider.name(),
                    ai.doc_type,
                    ai.confidence
                ));
                heuristic
            }
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "AI escalation failed, using heuristic");
                heuristic.reasoning.push_str(&format!("; AI escalation failed: {}", e));
                heuristic
            }
        }
    }

    /// Ask the provider for `fields` of a document of known type.
    ///
    /// Returns only requested, non-blank fields. No provider, provider
    /// errors, timeouts and cancellation all yield an empty map.
    pub async fn extract_fields(
        &self,
        text: &str,
        doc_type: SourceType,
        fields: &[String],
        cancel: &CancellationToken,
    ) -> Map<String, Value> {
        let Some(provider) = self.provider.as_ref() else {
            return Map::new();
        };
        if fields.is_empty() || text.trim().is_empty() {
            return Map::new();
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            answer = tokio::time::timeout(
                self.timeout,
                provider.extract_fields(text, doc_type, fields),
            ) => answer.unwrap_or(Err(ProviderError::Timeout(timeout_ms))),
        };

        match outcome {
            Ok(found) => {
                let kept: Map<String, Value> = found
                    .into_iter()
                    .filter(|(key, value)| fields.contains(key) && !is_blank(value))
                    .collect();
                debug!(
                    provider = provider.name(),
                    doc_type = %doc_type,
                    requested = fields.len(),
                    extracted = kept.len(),
                    "AI field extraction finished"
                );
                kept
            }
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "AI field extraction failed, keeping pattern fields");
                Map::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;

    enum Behaviour {
        Answer(SourceType, f64),
        Fail,
        Hang,
    }

    struct MockProvider(Behaviour);

    #[async_trait]
    impl ClassificationProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn classify_document(
            &self,
            _text: &str,
            _candidates: &[SourceType],
            _metadata: Option<&Map<String, Value>>,
        ) -> Result<ClassificationResult, ProviderError> {
            match self.0 {
                Behaviour::Answer(doc_type, confidence) => Ok(ClassificationResult {
                    doc_type,
                    suggested_parser: None,
                    confidence,
                    probabilities: BTreeMap::from([(doc_type, confidence)]),
                    reasoning: "mock".into(),
                    provider: "mock".into(),
                    enhanced_by_ai: true,
                    fingerprint: None,
                }),
                Behaviour::Fail => Err(ProviderError::Request("boom".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Request("unreachable".into()))
                }
            }
        }

        async fn extract_fields(
            &self,
            _text: &str,
            _doc_type: SourceType,
            _fields: &[String],
        ) -> Result<Map<String, Value>, ProviderError> {
            match self.0 {
                Behaviour::Answer(..) => Ok(json!({"total": "112.00", "invoice_date": "", "notes": "unasked"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default()),
                Behaviour::Fail => Err(ProviderError::Request("boom".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Request("unreachable".into()))
                }
            }
        }

        fn get_telemetry(&self) -> ProviderTelemetry {
            ProviderTelemetry::default()
        }
    }

    fn engine(behaviour: Behaviour, timeout_ms: u64) -> ClassificationEngine {
        ClassificationEngine::new(
            ScoringWeights::defaults(),
            Some(Arc::new(MockProvider(behaviour))),
            0.7,
            Duration::from_millis(timeout_ms),
        )
    }

    fn ambiguous() -> ClassificationInput {
        ClassificationInput::from_rows(&[json!({"col_a": "x", "col_b": "y"}).as_object().unwrap().clone()])
    }

    fn bank() -> ClassificationInput {
        let rows: Vec<Map<String, Value>> = [
            json!({"Fecha": "01/03/2024", "Concepto": "Nomina", "Debe": "", "Haber": "1500", "Saldo": "2500"}),
            json!({"Fecha": "02/03/2024", "Concepto": "Cafe", "Debe": "-3,50", "Haber": "", "Saldo": "2496,50"}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();
        ClassificationInput::from_rows(&rows)
    }

    #[tokio::test]
    async fn test_confident_heuristic_skips_provider() {
        let e = engine(Behaviour::Answer(SourceType::Invoices, 0.99), 1000);
        let r = e.classify(&bank(), &[], &CancellationToken::new()).await;
        assert_eq!(r.doc_type, SourceType::Bank);
        assert!(!r.enhanced_by_ai);
        assert!(r.fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_more_confident_ai_is_adopted() {
        let e = engine(Behaviour::Answer(SourceType::Expenses, 0.9), 1000);
        let r = e.classify(&ambiguous(), &[], &CancellationToken::new()).await;
        assert_eq!(r.doc_type, SourceType::Expenses);
        assert!(r.enhanced_by_ai);
        assert!(r.fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_final_confidence_never_below_heuristic() {
        let input = ambiguous();
        let heuristic = ClassificationEngine::heuristic_only().score(&input, &[]);
        for behaviour in [
            Behaviour::Answer(SourceType::Products, 0.0),
            Behaviour::Fail,
            Behaviour::Answer(SourceType::Products, 0.6),
        ] {
            let r = engine(behaviour, 1000).classify(&input, &[], &CancellationToken::new()).await;
            assert!(r.confidence >= heuristic.confidence);
        }
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let e = engine(Behaviour::Fail, 1000);
        let r = e.classify(&ambiguous(), &[], &CancellationToken::new()).await;
        assert!(!r.enhanced_by_ai);
        assert!(r.reasoning.contains("AI escalation failed"));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let e = engine(Behaviour::Hang, 20);
        let r = e.classify(&ambiguous(), &[], &CancellationToken::new()).await;
        assert!(!r.enhanced_by_ai);
        assert!(r.reasoning.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_falls_back() {
        let e = engine(Behaviour::Hang, 60_000);
        let token = CancellationToken::new();
        token.cancel();
        let r = e.classify(&ambiguous(), &[], &token).await;
        assert!(!r.enhanced_by_ai);
        assert!(r.reasoning.contains("cancelled"));
    }

    fn wanted() -> Vec<String> {
        vec!["invoice_date".to_string(), "total".to_string()]
    }

    #[tokio::test]
    async fn test_extract_fields_keeps_requested_non_blank() {
        let e = engine(Behaviour::Answer(SourceType::Invoices, 0.9), 1000);
        let found = e
            .extract_fields("FACTURA ...", SourceType::Invoices, &wanted(), &CancellationToken::new())
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found["total"], json!("112.00"));
    }

    #[tokio::test]
    async fn test_extract_fields_failures_yield_nothing() {
        let cancel = CancellationToken::new();
        assert!(engine(Behaviour::Fail, 1000)
            .extract_fields("text", SourceType::Invoices, &wanted(), &cancel)
            .await
            .is_empty());
        assert!(engine(Behaviour::Hang, 20)
            .extract_fields("text", SourceType::Invoices, &wanted(), &cancel)
            .await
            .is_empty());

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(engine(Behaviour::Hang, 60_000)
            .extract_fields("text", SourceType::Invoices, &wanted(), &cancelled)
            .await
            .is_empty());
        assert!(ClassificationEngine::heuristic_only()
            .extract_fields("text", SourceType::Invoices, &wanted(), &cancel)
            .await
            .is_empty());
    }

    #[test]
    fn test_set_weights_swaps_scorer() {
        let e = ClassificationEngine::heuristic_only();
        let mut w = e.weights();
        w.version = 7;
        e.set_weights(w);
        assert_eq!(e.weights().version, 7);
    }

    #[test]
    fn test_ocr_parse_is_classified_as_text() {
        let mut parsed = ParseResult::default();
        parsed.records.push(crate::parsers::RawRecord {
            idx: 0,
            fields: json!({"text": "FACTURA 001\nSubtotal 10\nIVA 1.2\nTotal 11.2", "pages": 1})
                .as_object()
                .unwrap()
                .clone(),
        });
        parsed.metadata.insert("ocr_confidence".into(), json!(0.9));
        let input = ClassificationInput::from_parse(&parsed);
        assert!(input.records.is_empty());
        assert!(input.text.starts_with("FACTURA"));
    }
}
