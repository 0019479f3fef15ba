//! Batch creation, ingestion and revalidation
//!
//! Ingestion runs parse → classify → route → map/validate/dedupe in memory,
//! then writes the classification, every item and the re-aggregated batch
//! status in one transaction. Items are keyed by
//! `idempotency_key(tenant, file_key, idx)`, so ingesting the same content
//! twice inserts nothing the second time.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tally_common::hash::sha256_parts;
use tally_common::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::blob_store::BlobStore;
use super::pipeline::{parse_error_record, RecordPipeline, PARSE_ERROR};
use crate::classification::{ClassificationEngine, ClassificationInput};
use crate::db::{batches, items, mappings};
use crate::dedup::idempotency_key;
use crate::feedback::QualityGate;
use crate::mapping::normalize::is_blank;
use crate::models::{
    Batch, BatchStatus, ClassificationResult, ConfidenceBucket, ErrorPhase, Item, ItemError, ItemStatus, Mapping,
    NewBatch, SourceType,
};
use crate::parsers::ocr::OcrParser;
use crate::parsers::{FileInput, ParseError, ParseResult, ParserRegistry};
use crate::utils::{begin_monitored, retry_on_lock};
use crate::validation::gate::required_fields;

/// Parser id recorded for rows posted through the API
pub const API_PARSER: &str = "api";

/// Where a classification sends a batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Routing {
    pub source_type: SourceType,
    pub requires_confirmation: bool,
    pub force_review: bool,
}

/// Route a classified batch.
///
/// A declared specific type stays authoritative; the classifier only asks
/// for confirmation when it disagrees with HIGH confidence. Undeclared
/// batches follow the buckets: HIGH proceeds (unless the quality gate is
/// failing), MEDIUM waits for confirmation, LOW forces every item into
/// review and keeps the batch generic.
pub fn route(declared: Option<SourceType>, result: &ClassificationResult, gate_passed: bool) -> Routing {
    let bucket = result.bucket();
    if let Some(declared) = declared {
        let disagrees = bucket == ConfidenceBucket::High
            && result.doc_type != declared
            && result.doc_type != SourceType::Generic;
        if disagrees {
            warn!(
                declared = %declared,
                classified = %result.doc_type,
                confidence = result.confidence,
                "Classifier disagrees with declared source type"
            );
        }
        return Routing {
            source_type: declared,
            requires_confirmation: disagrees,
            force_review: false,
        };
    }

    match bucket {
        ConfidenceBucket::High => Routing {
            source_type: result.doc_type,
            requires_confirmation: !gate_passed,
            force_review: false,
        },
        ConfidenceBucket::Medium => Routing {
            source_type: result.doc_type,
            requires_confirmation: true,
            force_review: false,
        },
        ConfidenceBucket::Low => Routing {
            source_type: SourceType::Generic,
            requires_confirmation: false,
            force_review: true,
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub source_type: SourceType,
    pub parser: Option<String>,
    pub file_key: String,
    pub inserted: usize,
    /// Positions already ingested under the same idempotency key
    pub already_ingested: usize,
    pub parse_errors: Vec<ParseError>,
    pub classification: ClassificationResult,
    pub requires_confirmation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevalidateReport {
    pub batch_id: Uuid,
    pub revalidated: usize,
    pub status: BatchStatus,
}

/// One source position ready to become an item
struct SourceRow {
    idx: i64,
    raw: Map<String, Value>,
    parse_error: Option<String>,
}

struct IngestPlan {
    tenant_id: String,
    batch_id: Uuid,
    file_key: String,
    set_file_key: bool,
    set_source_type: bool,
    classification: ClassificationResult,
    routing: Routing,
    items: Vec<Item>,
}

pub struct IngestService {
    db: SqlitePool,
    blobs: Arc<dyn BlobStore>,
    parsers: Arc<ParserRegistry>,
    engine: Arc<ClassificationEngine>,
    pipeline: Arc<RecordPipeline>,
    gate: QualityGate,
    max_lock_wait_ms: u64,
}

impl IngestService {
    pub fn new(
        db: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        parsers: Arc<ParserRegistry>,
        engine: Arc<ClassificationEngine>,
        pipeline: Arc<RecordPipeline>,
        gate: QualityGate,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            blobs,
            parsers,
            engine,
            pipeline,
            gate,
            max_lock_wait_ms,
        }
    }

    pub async fn create_batch(&self, tenant_id: &str, user_id: &str, params: NewBatch) -> Result<Batch> {
        let mut conn = self.db.acquire().await?;
        if let Some(mapping_id) = params.mapping_id {
            mappings::require_mapping(&mut conn, tenant_id, mapping_id).await?;
        }
        let batch = Batch::new(tenant_id, user_id, params);
        batches::insert_batch(&mut conn, &batch).await?;
        info!(
            batch_id = %batch.id,
            tenant_id,
            source_type = %batch.source_type,
            origin = batch.origin.as_str(),
            "Batch created"
        );
        Ok(batch)
    }

    pub async fn get_batch(&self, tenant_id: &str, batch_id: Uuid) -> Result<Batch> {
        batches::require_batch(&mut *self.db.acquire().await?, tenant_id, batch_id).await
    }

    pub async fn list_batches(
        &self,
        tenant_id: &str,
        status: Option<BatchStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Batch>> {
        if limit <= 0 || offset < 0 {
            return Err(Error::InvalidInput("limit must be positive and offset non-negative".into()));
        }
        batches::list_batches(&mut *self.db.acquire().await?, tenant_id, status, limit, offset).await
    }

    /// Parse, classify and stage an uploaded file
    pub async fn ingest_file(
        &self,
        tenant_id: &str,
        batch_id: Uuid,
        file: FileInput,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let (batch, template) = self.open_batch(tenant_id, batch_id).await?;
        let file_key = format!(
            "{}/{}/{}",
            tenant_id,
            sha256_parts([&file.bytes]),
            safe_file_name(&file.file_name)
        );
        ensure_same_source(&batch, &file_key)?;
        self.blobs.put(&file_key, &file.bytes).await?;

        let declared = declared_type(&batch, template.as_ref());
        let (selection, mut parsed) = self.parsers.parse(&file, declared).await;
        let parser = selection.map(|s| s.parser_id.to_string());

        let mut classification = self
            .engine
            .classify(&ClassificationInput::from_parse(&parsed), &[], cancel)
            .await;
        classification.suggested_parser = parser.clone();
        if parser.as_deref() == Some(OcrParser::ID) {
            let doc_type = declared.unwrap_or(classification.doc_type);
            self.fill_ocr_fields(&mut parsed, doc_type, cancel).await;
        }

        let mut rows: Vec<SourceRow> = parsed
            .records
            .iter()
            .map(|r| SourceRow {
                idx: r.idx as i64,
                raw: r.fields.clone(),
                parse_error: None,
            })
            .collect();
        for error in &parsed.errors {
            if let Some(idx) = error.idx {
                rows.push(SourceRow {
                    idx: idx as i64,
                    raw: parse_error_record(error.raw.as_deref()),
                    parse_error: Some(error.message.clone()),
                });
            }
        }
        rows.sort_by_key(|r| r.idx);

        self.stage(batch, template, file_key, classification, rows, parsed.errors, parser)
            .await
    }

    /// Stage rows posted through the API
    pub async fn ingest_rows(
        &self,
        tenant_id: &str,
        batch_id: Uuid,
        rows: Vec<Map<String, Value>>,
        file_key: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        if rows.is_empty() {
            return Err(Error::InvalidInput("no rows to ingest".into()));
        }
        let (batch, template) = self.open_batch(tenant_id, batch_id).await?;
        let file_key = match file_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => key,
            None => format!("{}/api/{}", tenant_id, sha256_parts([serde_json::to_vec(&rows)?])),
        };
        ensure_same_source(&batch, &file_key)?;

        let mut classification = self
            .engine
            .classify(&ClassificationInput::from_rows(&rows), &[], cancel)
            .await;
        classification.suggested_parser = Some(API_PARSER.to_string());

        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| SourceRow {
                idx: idx as i64,
                raw,
                parse_error: None,
            })
            .collect();
        self.stage(batch, template, file_key, classification, rows, Vec::new(), Some(API_PARSER.to_string()))
            .await
    }

    /// Re-run every pre-promotion item of a batch
    pub async fn revalidate_batch(&self, tenant_id: &str, batch_id: Uuid) -> Result<RevalidateReport> {
        retry_on_lock("ingest::revalidate", self.max_lock_wait_ms, || {
            self.revalidate_once(tenant_id, batch_id)
        })
        .await
    }

    async fn revalidate_once(&self, tenant_id: &str, batch_id: Uuid) -> Result<RevalidateReport> {
        let mut tx = begin_monitored(&self.db, "ingest::revalidate").await?;
        let batch = batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        let ctx = self.pipeline.load_context(tx.conn()?, &batch).await?;

        let mut revalidated = 0;
        for mut item in items::list_items(tx.conn()?, tenant_id, batch_id, None).await? {
            if self.pipeline.revalidate_item(tx.conn()?, &ctx, &mut item).await? {
                revalidated += 1;
            }
        }
        let status = batches::refresh_status(tx.conn()?, tenant_id, batch_id).await?;
        tx.commit().await?;

        info!(batch_id = %batch_id, revalidated, status = %status, "Batch revalidated");
        Ok(RevalidateReport {
            batch_id,
            revalidated,
            status,
        })
    }

    /// Ask the AI provider for required fields the OCR patterns missed
    async fn fill_ocr_fields(&self, parsed: &mut ParseResult, doc_type: SourceType, cancel: &CancellationToken) {
        let required = required_fields(doc_type);
        for record in &mut parsed.records {
            let Some(text) = record.fields.get("text").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let missing: Vec<String> = required
                .iter()
                .filter(|field| record.fields.get(**field).map_or(true, is_blank))
                .map(|field| field.to_string())
                .collect();
            if missing.is_empty() {
                continue;
            }

            let found = self.engine.extract_fields(&text, doc_type, &missing, cancel).await;
            if !found.is_empty() {
                info!(
                    doc_type = %doc_type,
                    filled = ?found.keys().collect::<Vec<_>>(),
                    still_missing = missing.len() - found.len(),
                    "OCR fields completed by AI extraction"
                );
            }
            record.fields.extend(found);
        }
    }

    async fn open_batch(&self, tenant_id: &str, batch_id: Uuid) -> Result<(Batch, Option<Mapping>)> {
        let mut conn = self.db.acquire().await?;
        let batch = batches::require_batch(&mut conn, tenant_id, batch_id).await?;
        if batch.status == BatchStatus::Promoted {
            return Err(Error::Conflict(format!("batch {} is already promoted", batch_id)));
        }
        let template = match batch.mapping_id {
            Some(mapping_id) => Some(mappings::require_mapping(&mut conn, tenant_id, mapping_id).await?),
            None => None,
        };
        Ok((batch, template))
    }

    #[allow(clippy::too_many_arguments)]
    async fn stage(
        &self,
        batch: Batch,
        template: Option<Mapping>,
        file_key: String,
        classification: ClassificationResult,
        rows: Vec<SourceRow>,
        parse_errors: Vec<ParseError>,
        parser: Option<String>,
    ) -> Result<IngestReport> {
        let declared = declared_type(&batch, template.as_ref());
        let gate_passed = if declared.is_none() && classification.bucket() == ConfidenceBucket::High {
            self.gate.evaluate(&mut *self.db.acquire().await?).await?.passed
        } else {
            true
        };
        let routing = route(declared, &classification, gate_passed);

        let rules = self
            .pipeline
            .rules_for(&mut *self.db.acquire().await?, &batch.tenant_id)
            .await?;
        let ctx = self
            .pipeline
            .context(routing.source_type, template.as_ref(), rules, routing.force_review);

        let now = Utc::now();
        let items: Vec<Item> = rows
            .into_iter()
            .map(|row| {
                let (normalized, status, errors, dedupe_hash) = match row.parse_error {
                    Some(message) => (
                        Map::new(),
                        ItemStatus::ErrorValidation,
                        vec![ItemError::phase(ErrorPhase::Parse, PARSE_ERROR, message)],
                        None,
                    ),
                    None => {
                        let processed = ctx.process(&row.raw, &Map::new());
                        (processed.normalized, processed.status, processed.errors, processed.dedupe_hash)
                    }
                };
                Item {
                    id: Uuid::new_v4(),
                    tenant_id: batch.tenant_id.clone(),
                    batch_id: batch.id,
                    idx: row.idx,
                    raw: row.raw,
                    normalized,
                    status,
                    errors,
                    dedupe_hash,
                    idempotency_key: idempotency_key(&batch.tenant_id, &file_key, row.idx),
                    promoted_to: None,
                    promoted_id: None,
                    promoted_at: None,
                    created_at: now,
                    updated_at: now,
                }
            })
            .collect();

        let plan = IngestPlan {
            tenant_id: batch.tenant_id.clone(),
            batch_id: batch.id,
            set_file_key: batch.file_key.is_none(),
            set_source_type: batch.source_type != routing.source_type,
            file_key,
            classification,
            routing,
            items,
        };
        let (inserted, already_ingested, status) =
            retry_on_lock("ingest::stage", self.max_lock_wait_ms, || self.persist(&plan)).await?;

        info!(
            batch_id = %plan.batch_id,
            source_type = %plan.routing.source_type,
            confidence = plan.classification.confidence,
            provider = %plan.classification.provider,
            inserted,
            already_ingested,
            parse_errors = parse_errors.len(),
            status = %status,
            "Batch ingested"
        );

        Ok(IngestReport {
            batch_id: plan.batch_id,
            status,
            source_type: plan.routing.source_type,
            parser,
            file_key: plan.file_key,
            inserted,
            already_ingested,
            parse_errors,
            requires_confirmation: plan.routing.requires_confirmation,
            classification: plan.classification,
        })
    }

    async fn persist(&self, plan: &IngestPlan) -> Result<(usize, usize, BatchStatus)> {
        let mut tx = begin_monitored(&self.db, "ingest::persist").await?;
        if plan.set_file_key {
            batches::set_file_key(tx.conn()?, &plan.tenant_id, plan.batch_id, &plan.file_key).await?;
        }
        if plan.set_source_type {
            batches::set_source_type(tx.conn()?, &plan.tenant_id, plan.batch_id, plan.routing.source_type).await?;
        }
        batches::record_classification(
            tx.conn()?,
            &plan.tenant_id,
            plan.batch_id,
            &plan.classification,
            plan.classification.suggested_parser.as_deref(),
            plan.routing.requires_confirmation,
        )
        .await?;

        let mut inserted = 0;
        let mut already = 0;
        for item in &plan.items {
            if items::insert_item(tx.conn()?, item).await? {
                inserted += 1;
            } else {
                already += 1;
            }
        }
        let status = batches::refresh_status(tx.conn()?, &plan.tenant_id, plan.batch_id).await?;
        tx.commit().await?;
        Ok((inserted, already, status))
    }
}

/// A batch holds one source; re-ingesting it must present the same key
fn ensure_same_source(batch: &Batch, file_key: &str) -> Result<()> {
    match batch.file_key.as_deref() {
        Some(existing) if existing != file_key => Err(Error::Conflict(format!(
            "batch {} already holds file {}",
            batch.id, existing
        ))),
        _ => Ok(()),
    }
}

/// The batch's own specific type, else its template's
fn declared_type(batch: &Batch, template: Option<&Mapping>) -> Option<SourceType> {
    if batch.source_type != SourceType::Generic {
        return Some(batch.source_type);
    }
    template
        .map(|t| t.source_type)
        .filter(|t| *t != SourceType::Generic)
}

/// Last path segment of an upload name, restricted to a portable alphabet
fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
