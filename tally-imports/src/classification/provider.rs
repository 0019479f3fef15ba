//! Classification provider capability interface
//!
//! Providers are the AI layer behind the heuristic scorer. Which one runs is
//! a configuration decision ([`build_provider`]); every provider is wrapped
//! in the TTL cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_common::Clock;
use thiserror::Error;

use super::cache::{CachedProvider, ClassificationCache};
use super::hosted::{UnifiedServiceProvider, VendorProvider};
use super::local::LocalProvider;
use crate::config::{AiConfig, ProviderKind};
use crate::models::{ClassificationResult, SourceType};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider request failed: {0}")]
    Request(String),

    #[error("Provider response invalid: {0}")]
    InvalidResponse(String),

    #[error("Provider timed out after {0} ms")]
    Timeout(u64),

    #[error("Provider call cancelled")]
    Cancelled,
}

/// Point-in-time provider counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTelemetry {
    pub provider: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Lock-free counters shared by provider implementations
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl TelemetryCounters {
    pub fn record(&self, success: bool, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, provider: &str) -> ProviderTelemetry {
        let requests = self.requests.load(Ordering::Relaxed);
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        ProviderTelemetry {
            provider: provider.to_string(),
            requests,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            avg_latency_ms: if requests == 0 { 0.0 } else { total as f64 / requests as f64 },
            cache_hits: 0,
            cache_misses: 0,
        }
    }
}

/// AI classification backend
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Classify a document's text among `candidates` (all specific types when empty)
    async fn classify_document(
        &self,
        text: &str,
        candidates: &[SourceType],
        metadata: Option<&Map<String, Value>>,
    ) -> Result<ClassificationResult, ProviderError>;

    /// Pull named fields for a known document type out of free text
    async fn extract_fields(
        &self,
        text: &str,
        doc_type: SourceType,
        fields: &[String],
    ) -> Result<Map<String, Value>, ProviderError>;

    fn get_telemetry(&self) -> ProviderTelemetry;
}

/// Wire shape shared by hosted providers' classification answers
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProviderAnswer {
    #[serde(alias = "documentType", alias = "type")]
    pub doc_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub probabilities: Option<std::collections::BTreeMap<String, f64>>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ProviderAnswer {
    /// Validate against the candidate set and convert
    pub(crate) fn into_result(
        self,
        provider: &str,
        candidates: &[SourceType],
    ) -> Result<ClassificationResult, ProviderError> {
        let doc_type = SourceType::from_str(&self.doc_type)
            .map_err(|_| ProviderError::InvalidResponse(format!("unknown type '{}'", self.doc_type)))?;
        if !candidates.is_empty() && !candidates.contains(&doc_type) {
            return Err(ProviderError::InvalidResponse(format!(
                "type '{}' is not a candidate",
                doc_type
            )));
        }
        if !self.confidence.is_finite() {
            return Err(ProviderError::InvalidResponse("confidence is not a number".into()));
        }
        let confidence = self.confidence.clamp(0.0, 1.0);

        let mut probabilities = std::collections::BTreeMap::new();
        for (name, p) in self.probabilities.unwrap_or_default() {
            if let Ok(t) = SourceType::from_str(&name) {
                probabilities.insert(t, p.clamp(0.0, 1.0));
            }
        }
        probabilities.entry(doc_type).or_insert(confidence);

        Ok(ClassificationResult {
            doc_type,
            suggested_parser: None,
            confidence,
            probabilities,
            reasoning: self.reasoning.unwrap_or_default(),
            provider: provider.to_string(),
            enhanced_by_ai: true,
            fingerprint: None,
        })
    }
}

/// Candidate list as sent to providers (all specific types when empty)
pub(crate) fn effective_candidates(candidates: &[SourceType]) -> Vec<SourceType> {
    if candidates.is_empty() {
        SourceType::SPECIFIC.to_vec()
    } else {
        candidates.to_vec()
    }
}

/// Build the configured provider, wrapped in the classification cache.
/// `ProviderKind::None` yields `None` (heuristic only).
pub fn build_provider(
    config: &AiConfig,
    api_key: Option<String>,
    clock: Arc<dyn Clock>,
) -> Result<Option<Arc<dyn ClassificationProvider>>, ProviderError> {
    let inner: Arc<dyn ClassificationProvider> = match config.provider {
        ProviderKind::None => return Ok(None),
        ProviderKind::Local => Arc::new(LocalProvider::new()),
        ProviderKind::Unified => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| ProviderError::NotConfigured("unified provider endpoint".into()))?;
            let key = api_key.ok_or_else(|| ProviderError::NotConfigured("AI API key".into()))?;
            Arc::new(UnifiedServiceProvider::new(
                endpoint,
                key,
                config.model.clone(),
                config.requests_per_minute,
            )?)
        }
        ProviderKind::Vendor => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| ProviderError::NotConfigured("vendor provider endpoint".into()))?;
            let key = api_key.ok_or_else(|| ProviderError::NotConfigured("AI API key".into()))?;
            Arc::new(VendorProvider::new(endpoint, key, config.requests_per_minute)?)
        }
    };

    let cache = Arc::new(ClassificationCache::new(
        clock,
        chrono::Duration::seconds(config.cache_ttl_secs as i64),
        config.cache_max_entries,
    ));
    tracing::info!(
        provider = inner.name(),
        ttl_secs = config.cache_ttl_secs,
        "Classification provider configured"
    );
    Ok(Some(Arc::new(CachedProvider::new(inner, cache))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_common::SystemClock;

    #[test]
    fn test_answer_validation() {
        let answer = ProviderAnswer {
            doc_type: "bank".into(),
            confidence: 1.4,
            probabilities: None,
            reasoning: None,
        };
        let result = answer.into_result("x", &[SourceType::Bank]).unwrap();
        assert_eq!(result.confidence, 1.0);
        assert!(result.enhanced_by_ai);
        assert_eq!(result.probabilities[&SourceType::Bank], 1.0);

        let answer = ProviderAnswer {
            doc_type: "bank".into(),
            confidence: 0.9,
            probabilities: None,
            reasoning: None,
        };
        assert!(answer.into_result("x", &[SourceType::Invoices]).is_err());
    }

    #[test]
    fn test_factory_variants() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut config = AiConfig::default();
        assert!(build_provider(&config, None, clock.clone()).unwrap().is_none());

        config.provider = ProviderKind::Local;
        let p = build_provider(&config, None, clock.clone()).unwrap().unwrap();
        assert_eq!(p.name(), "local");

        config.provider = ProviderKind::Unified;
        config.endpoint = Some("http://localhost:9/v1/chat/completions".into());
        assert!(matches!(
            build_provider(&config, None, clock.clone()),
            Err(ProviderError::NotConfigured(_))
        ));
        let p = build_provider(&config, Some("k".into()), clock).unwrap().unwrap();
        assert_eq!(p.name(), "unified");
    }

    #[test]
    fn test_counters() {
        let c = TelemetryCounters::default();
        c.record(true, Duration::from_millis(10));
        c.record(false, Duration::from_millis(30));
        let t = c.snapshot("p");
        assert_eq!((t.requests, t.successes, t.failures), (2, 1, 1));
        assert_eq!(t.avg_latency_ms, 20.0);
    }
}
