//! Classification feedback and classifier quality routes
//!
//! POST /feedback, GET /feedback, GET /feedback/quality,
//! POST /feedback/retrain, GET /feedback/snapshots,
//! POST /feedback/snapshots/:version/pin

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::TenantContext;
use crate::error::ApiResult;
use crate::feedback::{GateReport, RetrainOutcome};
use crate::models::{ClassifierSnapshot, FeedbackEvent, NewFeedback};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// POST /feedback
pub async fn record_feedback(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(input): Json<NewFeedback>,
) -> ApiResult<(StatusCode, Json<FeedbackEvent>)> {
    let event = state.feedback.record(&ctx.tenant_id, input).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /feedback
pub async fn list_feedback(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<FeedbackQuery>,
) -> ApiResult<Json<Vec<FeedbackEvent>>> {
    Ok(Json(state.feedback.list(&ctx.tenant_id, query.limit).await?))
}

/// GET /feedback/quality
pub async fn quality(State(state): State<AppState>, _ctx: TenantContext) -> ApiResult<Json<GateReport>> {
    Ok(Json(state.feedback.quality().await?))
}

/// POST /feedback/retrain (admin)
pub async fn retrain(State(state): State<AppState>, ctx: TenantContext) -> ApiResult<Json<RetrainOutcome>> {
    ctx.require_admin()?;
    Ok(Json(state.feedback.retrain().await?))
}

/// GET /feedback/snapshots
pub async fn list_snapshots(
    State(state): State<AppState>,
    _ctx: TenantContext,
) -> ApiResult<Json<Vec<ClassifierSnapshot>>> {
    Ok(Json(state.feedback.snapshots().await?))
}

/// POST /feedback/snapshots/:version/pin (admin)
pub async fn pin_snapshot(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(version): Path<i64>,
) -> ApiResult<Json<ClassifierSnapshot>> {
    ctx.require_admin()?;
    let snapshot = state.feedback.pin(version).await?;
    tracing::info!(version, user_id = %ctx.user_id, "Classifier snapshot pinned");
    Ok(Json(snapshot))
}

/// Build feedback routes
pub fn feedback_routes() -> Router<AppState> {
    Router::new()
        .route("/feedback", post(record_feedback).get(list_feedback))
        .route("/feedback/quality", get(quality))
        .route("/feedback/retrain", post(retrain))
        .route("/feedback/snapshots", get(list_snapshots))
        .route("/feedback/snapshots/:version/pin", post(pin_snapshot))
}
