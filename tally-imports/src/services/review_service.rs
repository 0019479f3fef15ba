//! Human review: field corrections, batch confirmation, enriched item
//! listings and the validation error export

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tally_common::{Error, Result};
use tracing::info;
use uuid::Uuid;

use super::pipeline::RecordPipeline;
use crate::classification::ClassificationEngine;
use crate::db::{audit, batches, feedback as feedback_db, items};
use crate::feedback::feedback_event;
use crate::mapping::normalize::{header_tokens, is_blank};
use crate::models::{
    Batch, BatchStatus, ClassificationResult, Correction, FeedbackEvent, Item, ItemStatus, Lineage, NewFeedback,
    SourceType,
};
use crate::utils::{begin_monitored, retry_on_lock};

/// Items sampled for header vocabulary when confirmation records feedback
const FEEDBACK_SAMPLE_ITEMS: usize = 10;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmRequest {
    /// Overrides the classified type; the current type is confirmed when absent
    #[serde(default)]
    pub source_type: Option<SourceType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmReport {
    pub batch: Batch,
    pub feedback: Option<FeedbackEvent>,
    pub revalidated: usize,
    pub status: BatchStatus,
}

/// Item with its audit trail
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: Item,
    pub corrections: Vec<Correction>,
    pub lineage: Vec<Lineage>,
}

pub struct ReviewService {
    db: SqlitePool,
    engine: Arc<ClassificationEngine>,
    pipeline: Arc<RecordPipeline>,
    max_lock_wait_ms: u64,
}

impl ReviewService {
    pub fn new(
        db: SqlitePool,
        engine: Arc<ClassificationEngine>,
        pipeline: Arc<RecordPipeline>,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            engine,
            pipeline,
            max_lock_wait_ms,
        }
    }

    /// Overwrite one field of an item, record the correction and revalidate
    pub async fn patch_item(
        &self,
        tenant_id: &str,
        user_id: &str,
        item_id: Uuid,
        field: &str,
        value: Value,
    ) -> Result<Item> {
        if field.trim().is_empty() {
            return Err(Error::InvalidInput("field must not be empty".into()));
        }
        retry_on_lock("review::patch_item", self.max_lock_wait_ms, || {
            self.patch_once(tenant_id, user_id, item_id, field, &value)
        })
        .await
    }

    async fn patch_once(
        &self,
        tenant_id: &str,
        user_id: &str,
        item_id: Uuid,
        field: &str,
        value: &Value,
    ) -> Result<Item> {
        let mut tx = begin_monitored(&self.db, "review::patch_item").await?;
        let mut item = items::require_item(tx.conn()?, tenant_id, item_id).await?;
        if !item.status.is_pre_promotion() {
            return Err(Error::Conflict(format!(
                "item {} is {} and can no longer be corrected",
                item_id, item.status
            )));
        }

        let base = if item.normalized.is_empty() { &item.raw } else { &item.normalized };
        let old_value = base.get(field).cloned().unwrap_or(Value::Null);
        let correction = Correction {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            item_id,
            field: field.to_string(),
            old_value,
            new_value: value.clone(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };
        audit::insert_correction(tx.conn()?, &correction).await?;

        let batch = batches::require_batch(tx.conn()?, tenant_id, item.batch_id).await?;
        let ctx = self.pipeline.load_context(tx.conn()?, &batch).await?;
        self.pipeline.revalidate_item(tx.conn()?, &ctx, &mut item).await?;
        let status = batches::refresh_status(tx.conn()?, tenant_id, item.batch_id).await?;
        tx.commit().await?;

        info!(
            item_id = %item_id,
            batch_id = %item.batch_id,
            field,
            user_id,
            item_status = %item.status,
            batch_status = %status,
            "Item corrected"
        );
        Ok(item)
    }

    /// Confirm (or override) a batch's classification and revalidate it
    /// under the confirmed type
    pub async fn confirm_batch(
        &self,
        tenant_id: &str,
        user_id: &str,
        batch_id: Uuid,
        request: ConfirmRequest,
    ) -> Result<ConfirmReport> {
        retry_on_lock("review::confirm", self.max_lock_wait_ms, || {
            self.confirm_once(tenant_id, user_id, batch_id, &request)
        })
        .await
    }

    async fn confirm_once(
        &self,
        tenant_id: &str,
        user_id: &str,
        batch_id: Uuid,
        request: &ConfirmRequest,
    ) -> Result<ConfirmReport> {
        let mut tx = begin_monitored(&self.db, "review::confirm").await?;
        let batch = batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        if batch.status == BatchStatus::Promoted {
            return Err(Error::Conflict(format!("batch {} is already promoted", batch_id)));
        }
        let confirmed = request.source_type.unwrap_or(batch.source_type);
        if confirmed == SourceType::Generic {
            return Err(Error::InvalidInput(
                "a batch can only be confirmed as a specific source type".into(),
            ));
        }

        batches::confirm(tx.conn()?, tenant_id, batch_id, user_id, Some(confirmed)).await?;
        let feedback = self.confirmation_feedback(tx.conn()?, &batch, confirmed).await?;

        let batch = batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        let ctx = self.pipeline.load_context(tx.conn()?, &batch).await?;
        let mut revalidated = 0;
        for mut item in items::list_items(tx.conn()?, tenant_id, batch_id, None).await? {
            if self.pipeline.revalidate_item(tx.conn()?, &ctx, &mut item).await? {
                revalidated += 1;
            }
        }
        let status = batches::refresh_status(tx.conn()?, tenant_id, batch_id).await?;
        let batch = batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        tx.commit().await?;

        info!(
            batch_id = %batch_id,
            user_id,
            source_type = %confirmed,
            revalidated,
            status = %status,
            "Batch classification confirmed"
        );
        Ok(ConfirmReport {
            batch,
            feedback,
            revalidated,
            status,
        })
    }

    /// Labeled sample from the stored classification; batches never
    /// classified (declared rows without ingestion) produce none
    async fn confirmation_feedback(
        &self,
        conn: &mut SqliteConnection,
        batch: &Batch,
        confirmed: SourceType,
    ) -> Result<Option<FeedbackEvent>> {
        let Some(snapshot) = batch.classification.clone() else {
            return Ok(None);
        };
        let classification: ClassificationResult = serde_json::from_value(snapshot)?;

        let sample = items::list_items(conn, &batch.tenant_id, batch.id, None).await?;
        let tokens = header_tokens(sample.iter().take(FEEDBACK_SAMPLE_ITEMS).map(|item| &item.raw));

        let event = feedback_event(
            &batch.tenant_id,
            &self.engine,
            NewFeedback {
                batch_id: Some(batch.id),
                fingerprint: classification.fingerprint.clone(),
                header_tokens: tokens,
                suggested: classification.doc_type,
                confirmed,
                confidence: classification.confidence,
            },
        );
        feedback_db::insert_feedback(conn, &event).await?;
        Ok(Some(event))
    }

    /// Items of a batch with their corrections and lineage
    pub async fn list_items(
        &self,
        tenant_id: &str,
        batch_id: Uuid,
        status: Option<ItemStatus>,
    ) -> Result<Vec<ItemView>> {
        let mut conn = self.db.acquire().await?;
        batches::require_batch(&mut conn, tenant_id, batch_id).await?;
        let list = items::list_items(&mut conn, tenant_id, batch_id, status).await?;

        let mut corrections: HashMap<Uuid, Vec<Correction>> = HashMap::new();
        for correction in audit::corrections_for_batch(&mut conn, tenant_id, batch_id).await? {
            corrections.entry(correction.item_id).or_default().push(correction);
        }
        let mut lineage: HashMap<Uuid, Vec<Lineage>> = HashMap::new();
        for entry in audit::lineage_for_batch(&mut conn, tenant_id, batch_id).await? {
            lineage.entry(entry.item_id).or_default().push(entry);
        }

        Ok(list
            .into_iter()
            .map(|item| ItemView {
                corrections: corrections.remove(&item.id).unwrap_or_default(),
                lineage: lineage.remove(&item.id).unwrap_or_default(),
                item,
            })
            .collect())
    }

    /// One CSV row per item error, in item order
    pub async fn export_errors_csv(&self, tenant_id: &str, batch_id: Uuid) -> Result<String> {
        let mut conn = self.db.acquire().await?;
        batches::require_batch(&mut conn, tenant_id, batch_id).await?;
        let failing = items::list_with_errors(&mut conn, tenant_id, batch_id).await?;
        errors_csv(&failing)
    }
}

/// Render item errors as CSV
pub fn errors_csv(failing: &[Item]) -> Result<String> {
    let csv_err = |e: csv::Error| Error::Internal(format!("Failed to write error report: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["idx", "status", "phase", "field", "code", "message", "detail", "raw"])
        .map_err(csv_err)?;
    for item in failing {
        let raw = serde_json::to_string(&item.raw)?;
        for error in &item.errors {
            let detail = match &error.detail {
                Some(detail) if !is_blank(detail) => detail.to_string(),
                _ => String::new(),
            };
            writer
                .write_record([
                    item.idx.to_string().as_str(),
                    item.status.as_str(),
                    error.phase.as_str(),
                    error.field.as_deref().unwrap_or(""),
                    error.code.as_deref().unwrap_or(""),
                    error.message.as_str(),
                    detail.as_str(),
                    raw.as_str(),
                ])
                .map_err(csv_err)?;
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("Failed to flush error report: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Internal(format!("Error report is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorPhase, ItemError};
    use serde_json::json;

    fn failing_item() -> Item {
        let now = Utc::now();
        Item {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            batch_id: Uuid::new_v4(),
            idx: 2,
            raw: json!({"amount": "12,3x4"}).as_object().unwrap().clone(),
            normalized: Default::default(),
            status: ItemStatus::ErrorValidation,
            errors: vec![
                ItemError::field(ErrorPhase::Validation, "amount", "INVALID_AMOUNT", "not a number"),
                ItemError::phase(ErrorPhase::Validation, "TOTALS_MISMATCH", "totals differ")
                    .with_detail(json!({"diff": "0.01"})),
            ],
            dedupe_hash: None,
            idempotency_key: "k".into(),
            promoted_to: None,
            promoted_id: None,
            promoted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_errors_csv_one_row_per_error() {
        let text = errors_csv(&[failing_item()]).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "2");
        assert_eq!(&rows[0][3], "amount");
        assert_eq!(&rows[0][4], "INVALID_AMOUNT");
        assert_eq!(&rows[1][3], "");
        assert_eq!(&rows[1][6], r#"{"diff":"0.01"}"#);
        assert_eq!(&rows[1][7], r#"{"amount":"12,3x4"}"#);
    }

    #[test]
    fn test_errors_csv_header_only_when_clean() {
        let text = errors_csv(&[]).unwrap();
        assert_eq!(text.trim(), "idx,status,phase,field,code,message,detail,raw");
    }
}
