//! Batch promotion
//!
//! **Algorithm** (one transaction per attempt, retried on lock contention):
//! 1. Refuse batches awaiting confirmation and generic batches
//! 2. Optionally repair stale PROMOTED-without-id items back to OK; they
//!    join the candidates even when an item subset was requested
//! 3. For each OK candidate in index order:
//!    - hash already promoted (this run or durably) → SKIPPED
//!    - otherwise run the handler inside a savepoint; success marks the
//!      item PROMOTED and appends lineage, failure rolls back the savepoint
//!      and marks the item ERROR_PROMOTION
//! 4. Re-aggregate the batch status and commit

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tally_common::{Error, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{HandlerRegistry, PromotionContext, PromotionError, PromotionOptions, MISSING_DOMAIN_ID};
use crate::db::{audit, batches, items, tenant_settings};
use crate::models::{BatchStatus, ErrorPhase, Item, ItemError, ItemStatus, Lineage};
use crate::utils::{begin_monitored, retry_on_lock};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromoteRequest {
    /// Restrict promotion to these items (all OK items when absent)
    pub item_ids: Option<Vec<Uuid>>,
    pub options: PromotionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionSummary {
    pub batch_id: Uuid,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Stale items downgraded to OK before promoting
    pub repaired: usize,
    pub status: BatchStatus,
}

/// Result of one item inside the savepoint
enum ItemOutcome {
    Created(String),
    Skipped,
    Failed(ItemError),
}

pub struct PromotionEngine {
    db: SqlitePool,
    handlers: HandlerRegistry,
    repair_stale: bool,
    fallback_currency: Option<String>,
    max_lock_wait_ms: u64,
}

impl PromotionEngine {
    pub fn new(
        db: SqlitePool,
        handlers: HandlerRegistry,
        repair_stale: bool,
        fallback_currency: Option<String>,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            handlers,
            repair_stale,
            fallback_currency,
            max_lock_wait_ms,
        }
    }

    pub async fn promote_batch(&self, tenant_id: &str, batch_id: Uuid, request: &PromoteRequest) -> Result<PromotionSummary> {
        retry_on_lock("promotion::batch", self.max_lock_wait_ms, || {
            self.promote_once(tenant_id, batch_id, request)
        })
        .await
    }

    async fn promote_once(&self, tenant_id: &str, batch_id: Uuid, request: &PromoteRequest) -> Result<PromotionSummary> {
        let mut tx = begin_monitored(&self.db, "promotion::batch").await?;
        let batch = batches::require_batch(tx.conn()?, tenant_id, batch_id).await?;
        if batch.awaiting_confirmation() {
            return Err(Error::Conflict(format!(
                "batch {} requires confirmation before promotion",
                batch_id
            )));
        }
        let handler = self.handlers.get(batch.source_type).ok_or_else(|| {
            Error::InvalidInput(format!(
                "batch {} has source type {} which cannot be promoted; confirm a specific type first",
                batch_id, batch.source_type
            ))
        })?;

        let default_currency = tenant_settings::get_settings(tx.conn()?, tenant_id)
            .await?
            .and_then(|s| s.default_currency)
            .or_else(|| self.fallback_currency.clone());
        let ctx = PromotionContext {
            options: request.options.clone(),
            default_currency,
        };

        let repaired: Vec<Uuid> = if self.repair_stale {
            repair_stale_promotions(tx.conn()?, tenant_id, Some(batch_id))
                .await?
                .into_iter()
                .map(|item| item.id)
                .collect()
        } else {
            Vec::new()
        };

        // Repaired items are retried even when outside the requested subset
        let wanted: Option<HashSet<Uuid>> = request
            .item_ids
            .as_ref()
            .map(|ids| ids.iter().chain(repaired.iter()).copied().collect());
        let candidates: Vec<Item> = items::list_items(tx.conn()?, tenant_id, batch_id, Some(ItemStatus::Ok))
            .await?
            .into_iter()
            .filter(|item| wanted.as_ref().map_or(true, |w| w.contains(&item.id)))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let (mut created, mut skipped, mut failed) = (0usize, 0usize, 0usize);

        for item in candidates {
            if let Some(hash) = &item.dedupe_hash {
                let duplicate = seen.contains(hash) || items::promoted_hash_exists(tx.conn()?, tenant_id, hash).await?;
                if duplicate {
                    item.status.transition(ItemStatus::Skipped)?;
                    items::set_status(tx.conn()?, tenant_id, item.id, ItemStatus::Skipped, &[]).await?;
                    debug!(item_id = %item.id, idx = item.idx, "Duplicate of promoted document skipped");
                    skipped += 1;
                    continue;
                }
            }

            let record = item.merged();
            let outcome = {
                let mut sp = tx.conn()?.begin().await?;
                let result = handler
                    .promote(&mut *sp, tenant_id, &record, item.promoted_id.as_deref(), &ctx)
                    .await;
                match result {
                    Ok(outcome) if outcome.skipped => {
                        sp.rollback().await?;
                        ItemOutcome::Skipped
                    }
                    Ok(outcome) => match outcome.domain_id {
                        Some(domain_id) => {
                            let marked = items::mark_promoted(
                                &mut *sp,
                                tenant_id,
                                item.id,
                                handler.target(),
                                &domain_id,
                                Utc::now(),
                            )
                            .await;
                            match marked {
                                Ok(()) => {
                                    audit::insert_lineage(
                                        &mut *sp,
                                        &Lineage {
                                            id: Uuid::new_v4(),
                                            tenant_id: tenant_id.to_string(),
                                            item_id: item.id,
                                            promoted_to: handler.target().to_string(),
                                            promoted_ref: domain_id.clone(),
                                            created_at: Utc::now(),
                                        },
                                    )
                                    .await?;
                                    sp.commit().await?;
                                    ItemOutcome::Created(domain_id)
                                }
                                Err(e) if e.is_unique_violation() => {
                                    sp.rollback().await?;
                                    ItemOutcome::Skipped
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        None => {
                            sp.rollback().await?;
                            ItemOutcome::Failed(ItemError::phase(
                                ErrorPhase::Promotion,
                                MISSING_DOMAIN_ID,
                                format!("{} handler returned no record id", handler.target()),
                            ))
                        }
                    },
                    Err(PromotionError::Storage(e)) if e.is_lock_contention() => return Err(e),
                    Err(e) => {
                        sp.rollback().await?;
                        ItemOutcome::Failed(ItemError::phase(ErrorPhase::Promotion, e.code(), e.to_string()))
                    }
                }
            };

            match outcome {
                ItemOutcome::Created(domain_id) => {
                    if let Some(hash) = item.dedupe_hash {
                        seen.insert(hash);
                    }
                    debug!(item_id = %item.id, target = handler.target(), domain_id = %domain_id, "Item promoted");
                    created += 1;
                }
                ItemOutcome::Skipped => {
                    items::set_status(tx.conn()?, tenant_id, item.id, ItemStatus::Skipped, &[]).await?;
                    skipped += 1;
                }
                ItemOutcome::Failed(error) => {
                    warn!(
                        item_id = %item.id,
                        idx = item.idx,
                        code = error.code.as_deref().unwrap_or_default(),
                        error = %error.message,
                        "Item promotion failed"
                    );
                    items::set_status(tx.conn()?, tenant_id, item.id, ItemStatus::ErrorPromotion, &[error]).await?;
                    failed += 1;
                }
            }
        }

        let status = batches::refresh_status(tx.conn()?, tenant_id, batch_id).await?;
        tx.commit().await?;

        let repaired = repaired.len();
        info!(
            batch_id = %batch_id,
            source_type = %batch.source_type,
            created,
            skipped,
            failed,
            repaired,
            status = %status,
            "Batch promotion finished"
        );
        Ok(PromotionSummary {
            batch_id,
            created,
            skipped,
            failed,
            repaired,
            status,
        })
    }
}

/// Downgrade PROMOTED-without-id items to OK so they can be promoted again
pub async fn repair_stale_promotions(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    batch_id: Option<Uuid>,
) -> Result<Vec<Item>> {
    let stale = items::list_stale_promotions(conn, tenant_id, batch_id).await?;
    let mut repaired = Vec::with_capacity(stale.len());
    for mut item in stale {
        if items::repair_stale(conn, tenant_id, item.id).await? {
            warn!(
                item_id = %item.id,
                batch_id = %item.batch_id,
                "Stale promotion repaired: PROMOTED without promoted_id reset to OK"
            );
            item.status = ItemStatus::Ok;
            item.promoted_to = None;
            item.promoted_at = None;
            repaired.push(item);
        }
    }
    Ok(repaired)
}
