//! Hosted AI providers
//!
//! - [`UnifiedServiceProvider`]: OpenAI-compatible chat completions asked
//!   for a JSON answer
//! - [`VendorProvider`]: document-AI style REST backend with dedicated
//!   `/classify` and `/extract` routes
//!
//! Both are rate limited client-side with a token bucket (requests per
//! minute from config) and time every call into their telemetry.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use super::provider::{
    effective_candidates, ClassificationProvider, ProviderAnswer, ProviderError, ProviderTelemetry,
    TelemetryCounters,
};
use crate::models::{ClassificationResult, SourceType};

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Characters of document text sent to hosted providers
const MAX_PROMPT_CHARS: usize = 6_000;

/// HTTP-level timeout; the engine applies its own (shorter) deadline on top
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

fn build_client() -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| ProviderError::Request(e.to_string()))
}

fn build_limiter(requests_per_minute: u32) -> Result<DirectLimiter, ProviderError> {
    let rpm = NonZeroU32::new(requests_per_minute)
        .ok_or_else(|| ProviderError::NotConfigured("requests_per_minute must be > 0".into()))?;
    Ok(RateLimiter::direct(Quota::per_minute(rpm)))
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_PROMPT_CHARS) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Request(format!("API error {}: {}", status, body)))
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

pub const UNIFIED_PROVIDER: &str = "unified";

/// OpenAI-compatible chat completion provider
pub struct UnifiedServiceProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    limiter: DirectLimiter,
    telemetry: TelemetryCounters,
}

impl UnifiedServiceProvider {
    pub fn new(endpoint: String, api_key: String, model: String, requests_per_minute: u32) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            endpoint,
            api_key,
            model,
            limiter: build_limiter(requests_per_minute)?,
            telemetry: TelemetryCounters::default(),
        })
    }

    async fn chat(&self, prompt: String) -> Result<String, ProviderError> {
        self.limiter.until_ready().await;

        let payload = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You classify back-office business documents. Answer with a single JSON object only.".into(),
                },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { format_type: "json_object" },
        };

        let started = Instant::now();
        let outcome = async {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            let chat: ChatResponse = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            chat.choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".into()))
        }
        .await;
        self.telemetry.record(outcome.is_ok(), started.elapsed());
        outcome
    }
}

pub(crate) fn classification_prompt(text: &str, candidates: &[SourceType], metadata: Option<&Map<String, Value>>) -> String {
    let names: Vec<&str> = candidates.iter().map(|c| c.as_str()).collect();
    let mut prompt = String::new();
    prompt.push_str("Classify the document below as exactly one of: ");
    prompt.push_str(&names.join(", "));
    prompt.push_str(".\nReply as JSON: {\"doc_type\": <one of the types>, \"confidence\": <0..1>, ");
    prompt.push_str("\"probabilities\": {<type>: <0..1>}, \"reasoning\": <short text>}.\n");
    if let Some(metadata) = metadata {
        prompt.push_str(&format!("Metadata: {}\n", Value::Object(metadata.clone())));
    }
    prompt.push_str("\n## Document\n");
    prompt.push_str(truncate(text));
    prompt
}

#[async_trait]
impl ClassificationProvider for UnifiedServiceProvider {
    fn name(&self) -> &str {
        UNIFIED_PROVIDER
    }

    async fn classify_document(
        &self,
        text: &str,
        candidates: &[SourceType],
        metadata: Option<&Map<String, Value>>,
    ) -> Result<ClassificationResult, ProviderError> {
        let candidates = effective_candidates(candidates);
        let content = self.chat(classification_prompt(text, &candidates, metadata)).await?;
        let answer: ProviderAnswer = serde_json::from_str(&content)
            .map_err(|e| ProviderError::InvalidResponse(format!("not a classification object: {}", e)))?;
        answer.into_result(UNIFIED_PROVIDER, &candidates)
    }

    async fn extract_fields(
        &self,
        text: &str,
        doc_type: SourceType,
        fields: &[String],
    ) -> Result<Map<String, Value>, ProviderError> {
        let prompt = format!(
            "Extract these fields from the {} document below: {}.\nReply as a JSON object keyed by field name; use null for missing fields.\n\n## Document\n{}",
            doc_type,
            fields.join(", "),
            truncate(text)
        );
        let content = self.chat(prompt).await?;
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ProviderError::InvalidResponse("expected a JSON object".into())),
            Err(e) => Err(ProviderError::InvalidResponse(e.to_string())),
        }
    }

    fn get_telemetry(&self) -> ProviderTelemetry {
        self.telemetry.snapshot(UNIFIED_PROVIDER)
    }
}

pub const VENDOR_PROVIDER: &str = "vendor";

#[derive(Serialize)]
struct VendorClassifyRequest<'a> {
    content: String,
    mime_type: &'static str,
    candidates: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Map<String, Value>>,
}

#[derive(Serialize)]
struct VendorExtractRequest<'a> {
    content: String,
    mime_type: &'static str,
    doc_type: &'a str,
    fields: &'a [String],
}

#[derive(Deserialize)]
struct VendorExtractResponse {
    #[serde(default, alias = "entities")]
    fields: Map<String, Value>,
}

/// Document-AI style REST provider
pub struct VendorProvider {
    client: Client,
    base_url: String,
    api_key: String,
    limiter: DirectLimiter,
    telemetry: TelemetryCounters,
}

impl VendorProvider {
    pub fn new(base_url: String, api_key: String, requests_per_minute: u32) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: build_limiter(requests_per_minute)?,
            telemetry: TelemetryCounters::default(),
        })
    }

    async fn post<B: Serialize + Sync, R: for<'de> Deserialize<'de>>(&self, route: &str, body: &B) -> Result<R, ProviderError> {
        self.limiter.until_ready().await;
        let started = Instant::now();
        let outcome = async {
            let response = self
                .client
                .post(format!("{}/{}", self.base_url, route))
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            check_status(response)
                .await?
                .json::<R>()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
        }
        .await;
        self.telemetry.record(outcome.is_ok(), started.elapsed());
        outcome
    }
}

#[async_trait]
impl ClassificationProvider for VendorProvider {
    fn name(&self) -> &str {
        VENDOR_PROVIDER
    }

    async fn classify_document(
        &self,
        text: &str,
        candidates: &[SourceType],
        metadata: Option<&Map<String, Value>>,
    ) -> Result<ClassificationResult, ProviderError> {
        let candidates = effective_candidates(candidates);
        let request = VendorClassifyRequest {
            content: BASE64.encode(truncate(text)),
            mime_type: "text/plain",
            candidates: candidates.iter().map(|c| c.as_str()).collect(),
            metadata,
        };
        let answer: ProviderAnswer = self.post("classify", &request).await?;
        answer.into_result(VENDOR_PROVIDER, &candidates)
    }

    async fn extract_fields(
        &self,
        text: &str,
        doc_type: SourceType,
        fields: &[String],
    ) -> Result<Map<String, Value>, ProviderError> {
        let request = VendorExtractRequest {
            content: BASE64.encode(truncate(text)),
            mime_type: "text/plain",
            doc_type: doc_type.as_str(),
            fields,
        };
        let response: VendorExtractResponse = self.post("extract", &request).await?;
        Ok(response.fields)
    }

    fn get_telemetry(&self) -> ProviderTelemetry {
        self.telemetry.snapshot(VENDOR_PROVIDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_candidates_and_truncates() {
        let long = "x".repeat(MAX_PROMPT_CHARS + 100);
        let prompt = classification_prompt(&long, &[SourceType::Bank, SourceType::Invoices], None);
        assert!(prompt.contains("bank, invoices"));
        assert!(prompt.len() < MAX_PROMPT_CHARS + 500);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(build_limiter(0).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let p = VendorProvider::new("http://127.0.0.1:9".into(), "k".into(), 60).unwrap();
        let err = p.classify_document("text", &[], None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Request(_)));
        assert_eq!(p.get_telemetry().failures, 1);
    }
}
