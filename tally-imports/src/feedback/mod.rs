//! Correction and quality feedback loop
//!
//! Feedback events pair the classifier's suggestion with the type a user
//! confirmed. They feed the quality gate and retraining. Events are stored
//! per tenant; the heuristic weights they train are shared by all tenants.

pub mod quality_gate;
pub mod retrain;
pub mod rollback;

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tally_common::{Error, Result};
use uuid::Uuid;

use crate::classification::ClassificationEngine;
use crate::config::QualityConfig;
use crate::db::feedback as feedback_db;
use crate::models::{ClassifierSnapshot, FeedbackEvent, NewFeedback};

pub use quality_gate::{compute_metrics, GateReport, QualityGate};
pub use retrain::{RetrainOutcome, Retrainer};
pub use rollback::RollbackManager;

/// Build a feedback event stamped with the active heuristic version
pub fn feedback_event(tenant_id: &str, engine: &ClassificationEngine, input: NewFeedback) -> FeedbackEvent {
    FeedbackEvent {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        batch_id: input.batch_id,
        fingerprint: input.fingerprint,
        header_tokens: input.header_tokens,
        suggested: input.suggested,
        confirmed: input.confirmed,
        confidence: input.confidence.clamp(0.0, 1.0),
        heuristic_version: engine.weights().version,
        created_at: Utc::now(),
    }
}

pub struct FeedbackService {
    db: SqlitePool,
    engine: Arc<ClassificationEngine>,
    gate: QualityGate,
    retrainer: Retrainer,
}

impl FeedbackService {
    pub fn new(db: SqlitePool, engine: Arc<ClassificationEngine>, config: QualityConfig) -> Self {
        Self {
            db,
            engine,
            gate: QualityGate::new(config.clone()),
            retrainer: Retrainer::new(config),
        }
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub async fn record(&self, tenant_id: &str, input: NewFeedback) -> Result<FeedbackEvent> {
        let event = feedback_event(tenant_id, &self.engine, input);
        feedback_db::insert_feedback(&mut *self.db.acquire().await?, &event).await?;
        tracing::info!(
            tenant_id,
            suggested = %event.suggested,
            confirmed = %event.confirmed,
            "Classification feedback recorded"
        );
        Ok(event)
    }

    pub async fn list(&self, tenant_id: &str, limit: i64) -> Result<Vec<FeedbackEvent>> {
        if limit <= 0 {
            return Err(Error::InvalidInput("limit must be positive".into()));
        }
        feedback_db::list_feedback(&mut *self.db.acquire().await?, tenant_id, limit).await
    }

    pub async fn quality(&self) -> Result<GateReport> {
        self.gate.evaluate(&mut *self.db.acquire().await?).await
    }

    pub async fn retrain(&self) -> Result<RetrainOutcome> {
        self.retrainer.retrain(&self.db, &self.engine).await
    }

    pub async fn snapshots(&self) -> Result<Vec<ClassifierSnapshot>> {
        feedback_db::list_snapshots(&mut *self.db.acquire().await?).await
    }

    pub async fn pin(&self, version: i64) -> Result<ClassifierSnapshot> {
        RollbackManager::pin(&self.db, &self.engine, version).await
    }
}
