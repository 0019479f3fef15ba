//! tally-imports library interface
//!
//! Document ingestion for the ERP: parse uploads, classify them, map and
//! validate every record, then promote validated records into business
//! tables. The binary in `main.rs` wires configuration and serves
//! [`build_router`]; integration tests build [`AppState`] directly.

pub mod api;
pub mod classification;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod feedback;
pub mod mapping;
pub mod models;
pub mod parsers;
pub mod promotion;
pub mod services;
pub mod utils;
pub mod validation;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::classification::ClassificationEngine;
use crate::config::ImportsConfig;
use crate::feedback::FeedbackService;
use crate::parsers::ocr::OcrService;
use crate::parsers::ParserRegistry;
use crate::promotion::{HandlerRegistry, PromotionEngine};
use crate::services::{AdminService, BlobStore, IngestService, RecordPipeline, ReviewService};
use crate::validation::{FormatCountryValidator, ValidationRules};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<ImportsConfig>,
    pub engine: Arc<ClassificationEngine>,
    pub ingest: Arc<IngestService>,
    pub review: Arc<ReviewService>,
    pub promotion: Arc<PromotionEngine>,
    pub feedback: Arc<FeedbackService>,
    pub admin: Arc<AdminService>,
    /// Cancelled on shutdown; in-flight AI calls hold child tokens
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: ImportsConfig,
        engine: Arc<ClassificationEngine>,
        blobs: Arc<dyn BlobStore>,
        ocr: Arc<dyn OcrService>,
    ) -> Self {
        let lock_wait = config.db_max_lock_wait_ms;
        let pipeline = Arc::new(RecordPipeline::new(
            Arc::new(FormatCountryValidator),
            ValidationRules::from(&config.validation),
        ));
        let feedback = Arc::new(FeedbackService::new(db.clone(), Arc::clone(&engine), config.quality.clone()));

        let ingest = Arc::new(IngestService::new(
            db.clone(),
            Arc::clone(&blobs),
            Arc::new(ParserRegistry::new(ocr)),
            Arc::clone(&engine),
            Arc::clone(&pipeline),
            feedback.gate().clone(),
            lock_wait,
        ));
        let review = Arc::new(ReviewService::new(db.clone(), Arc::clone(&engine), Arc::clone(&pipeline), lock_wait));
        let promotion = Arc::new(PromotionEngine::new(
            db.clone(),
            HandlerRegistry::standard(),
            config.repair_stale_promotions,
            config.validation.default_currency.clone(),
            lock_wait,
        ));
        let admin = Arc::new(AdminService::new(db.clone(), blobs, lock_wait));

        Self {
            db,
            config: Arc::new(config),
            engine,
            ingest,
            review,
            promotion,
            feedback,
            admin,
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_routes())
        .merge(api::mapping_routes())
        .merge(api::feedback_routes())
        .merge(api::admin_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
