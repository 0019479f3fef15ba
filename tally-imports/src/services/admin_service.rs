//! Administrative batch operations: reset, purge and stale-promotion
//! reconciliation

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tally_common::{Error, Result};
use tracing::{info, warn};
use uuid::Uuid;

use super::blob_store::BlobStore;
use crate::db::batches;
use crate::models::Batch;
use crate::promotion::engine::repair_stale_promotions;
use crate::utils::{begin_monitored, retry_on_lock};

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub batch: Batch,
    pub items_removed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub batch_id: Uuid,
    /// Stored file removed (no other batch referenced it)
    pub blob_deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub repaired_items: Vec<Uuid>,
    pub batches: Vec<Uuid>,
}

pub struct AdminService {
    db: SqlitePool,
    blobs: Arc<dyn BlobStore>,
    max_lock_wait_ms: u64,
}

impl AdminService {
    pub fn new(db: SqlitePool, blobs: Arc<dyn BlobStore>, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            blobs,
            max_lock_wait_ms,
        }
    }

    /// Drop every item and return the batch to PENDING. Refused once
    /// anything was promoted, since lineage would be orphaned.
    pub async fn reset_batch(&self, tenant_id: &str, batch_id: Uuid) -> Result<ResetReport> {
        retry_on_lock("admin::reset", self.max_lock_wait_ms, || self.reset_once(tenant_id, batch_id)).await
    }

    async fn reset_once(&self, tenant_id: &str, batch_id: Uuid) -> Result<ResetReport> {
        let mut tx = begin_monitored(&self.db, "admin::reset").await?;
        batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        let counts = batches::status_counts(tx.conn()?, tenant_id, batch_id).await?;
        if counts.promoted > 0 {
            return Err(Error::Conflict(format!(
                "batch {} has {} promoted items and cannot be reset",
                batch_id, counts.promoted
            )));
        }
        let items_removed = batches::clear_items(tx.conn()?, tenant_id, batch_id).await?;
        batches::reset(tx.conn()?, tenant_id, batch_id).await?;
        let batch = batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        tx.commit().await?;

        info!(batch_id = %batch_id, tenant_id, items_removed, "Batch reset");
        Ok(ResetReport { batch, items_removed })
    }

    /// Delete a batch with its items and audit rows
    pub async fn purge_batch(&self, tenant_id: &str, batch_id: Uuid) -> Result<PurgeReport> {
        let file_key = retry_on_lock("admin::purge", self.max_lock_wait_ms, || {
            self.purge_once(tenant_id, batch_id)
        })
        .await?;

        let blob_deleted = match file_key {
            Some(key) => match self.blobs.delete(&key).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(batch_id = %batch_id, file_key = %key, error = %e, "Stored file could not be removed");
                    false
                }
            },
            None => false,
        };
        info!(batch_id = %batch_id, tenant_id, blob_deleted, "Batch purged");
        Ok(PurgeReport { batch_id, blob_deleted })
    }

    /// Returns the file key once nothing else references it
    async fn purge_once(&self, tenant_id: &str, batch_id: Uuid) -> Result<Option<String>> {
        let mut tx = begin_monitored(&self.db, "admin::purge").await?;
        let batch = batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        batches::delete_batch(tx.conn()?, tenant_id, batch_id).await?;
        let orphaned = match batch.file_key {
            Some(key) => {
                let remaining = batches::count_with_file_key(tx.conn()?, tenant_id, &key).await?;
                (remaining == 0).then_some(key)
            }
            None => None,
        };
        tx.commit().await?;
        Ok(orphaned)
    }

    /// Repair PROMOTED-without-id items across the tenant (or one batch)
    pub async fn reconcile_stale(&self, tenant_id: &str, batch_id: Option<Uuid>) -> Result<ReconcileReport> {
        retry_on_lock("admin::reconcile", self.max_lock_wait_ms, || {
            self.reconcile_once(tenant_id, batch_id)
        })
        .await
    }

    async fn reconcile_once(&self, tenant_id: &str, batch_id: Option<Uuid>) -> Result<ReconcileReport> {
        let mut tx = begin_monitored(&self.db, "admin::reconcile").await?;
        if let Some(batch_id) = batch_id {
            batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        }
        let repaired = repair_stale_promotions(tx.conn()?, tenant_id, batch_id).await?;
        let touched: BTreeSet<Uuid> = repaired.iter().map(|item| item.batch_id).collect();
        for batch in &touched {
            batches::refresh_status(tx.conn()?, tenant_id, *batch).await?;
        }
        tx.commit().await?;

        info!(tenant_id, repaired = repaired.len(), batches = touched.len(), "Stale promotions reconciled");
        Ok(ReconcileReport {
            repaired_items: repaired.iter().map(|item| item.id).collect(),
            batches: touched.into_iter().collect(),
        })
    }
}
