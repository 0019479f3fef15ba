//! TTL cache in front of classification providers
//!
//! Keyed by SHA-256 of the document text plus the sorted candidate set.
//! Process-local and best effort: a lost entry only costs a provider call.
//! Time comes from the injected [`Clock`] so expiry is testable.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tally_common::hash::sha256_parts;
use tally_common::Clock;

use super::provider::{effective_candidates, ClassificationProvider, ProviderError, ProviderTelemetry};
use crate::models::{ClassificationResult, SourceType};

struct CacheEntry {
    result: ClassificationResult,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order for eviction; may hold keys already removed
    order: VecDeque<String>,
}

pub struct ClassificationCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ClassificationCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            clock,
            ttl,
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(text: &str, candidates: &[SourceType]) -> String {
        let mut names: Vec<&str> = effective_candidates(candidates).iter().map(|c| c.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        sha256_parts([text, &names.join(",")])
    }

    pub fn get(&self, key: &str) -> Option<ClassificationResult> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let found = match state.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.result.clone()),
            Some(_) => {
                state.entries.remove(key);
                None
            }
            None => None,
        };
        drop(state);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn put(&self, key: String, result: ClassificationResult) {
        let now = self.clock.now();
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            state.entries.retain(|_, e| e.expires_at > now);
            while state.entries.len() >= self.max_entries {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.entries.remove(&oldest);
            }
        }

        let entries = &state.entries;
        state.order.retain(|k| entries.contains_key(k) && *k != key);
        state.order.push_back(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                result,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Provider decorator answering repeated classifications from the cache
pub struct CachedProvider {
    inner: Arc<dyn ClassificationProvider>,
    cache: Arc<ClassificationCache>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn ClassificationProvider>, cache: Arc<ClassificationCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ClassificationProvider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn classify_document(
        &self,
        text: &str,
        candidates: &[SourceType],
        metadata: Option<&Map<String, Value>>,
    ) -> Result<ClassificationResult, ProviderError> {
        let key = ClassificationCache::key(text, candidates);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(provider = self.inner.name(), "Classification cache hit");
            return Ok(hit);
        }
        let result = self.inner.classify_document(text, candidates, metadata).await?;
        self.cache.put(key, result.clone());
        Ok(result)
    }

    async fn extract_fields(
        &self,
        text: &str,
        doc_type: SourceType,
        fields: &[String],
    ) -> Result<Map<String, Value>, ProviderError> {
        self.inner.extract_fields(text, doc_type, fields).await
    }

    fn get_telemetry(&self) -> ProviderTelemetry {
        let mut telemetry = self.inner.get_telemetry();
        telemetry.cache_hits = self.cache.hits();
        telemetry.cache_misses = self.cache.misses();
        telemetry
    }
}
