//! Administrative and tenant settings routes
//!
//! POST /admin/batches/:id/reset, DELETE /admin/batches/:id,
//! POST /admin/reconcile, GET/PUT /settings

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::TenantContext;
use crate::db::tenant_settings::{self, TenantSettings};
use crate::error::{ApiError, ApiResult};
use crate::services::{PurgeReport, ReconcileReport, ResetReport};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub batch_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    #[serde(default)]
    pub default_currency: Option<String>,
    #[serde(default)]
    pub default_country: Option<String>,
    #[serde(default)]
    pub require_currency: Option<bool>,
    #[serde(default)]
    pub require_category: Option<bool>,
}

/// POST /admin/batches/:id/reset
pub async fn reset_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<ResetReport>> {
    ctx.require_admin()?;
    Ok(Json(state.admin.reset_batch(&ctx.tenant_id, batch_id).await?))
}

/// DELETE /admin/batches/:id
pub async fn purge_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<PurgeReport>> {
    ctx.require_admin()?;
    Ok(Json(state.admin.purge_batch(&ctx.tenant_id, batch_id).await?))
}

/// POST /admin/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    ctx: TenantContext,
    request: Option<Json<ReconcileRequest>>,
) -> ApiResult<Json<ReconcileReport>> {
    ctx.require_admin()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.admin.reconcile_stale(&ctx.tenant_id, request.batch_id).await?))
}

/// GET /settings
pub async fn get_settings(State(state): State<AppState>, ctx: TenantContext) -> ApiResult<Json<TenantSettings>> {
    let mut conn = state.db.acquire().await?;
    let settings = tenant_settings::get_settings(&mut conn, &ctx.tenant_id)
        .await?
        .unwrap_or_else(|| TenantSettings::empty(&ctx.tenant_id));
    Ok(Json(settings))
}

/// PUT /settings (admin)
pub async fn put_settings(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<SettingsRequest>,
) -> ApiResult<Json<TenantSettings>> {
    ctx.require_admin()?;
    let default_currency = request.default_currency.map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty());
    if let Some(currency) = &default_currency {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ApiError::BadRequest(format!("invalid currency code: {}", currency)));
        }
    }
    let settings = TenantSettings {
        tenant_id: ctx.tenant_id.clone(),
        default_currency,
        default_country: request.default_country.map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty()),
        require_currency: request.require_currency,
        require_category: request.require_category,
        updated_at: Utc::now(),
    };
    let mut conn = state.db.acquire().await?;
    tenant_settings::upsert_settings(&mut conn, &settings).await?;
    tracing::info!(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id, "Tenant settings updated");
    Ok(Json(settings))
}

/// Build admin and settings routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/batches/:id/reset", post(reset_batch))
        .route("/admin/batches/:id", delete(purge_batch))
        .route("/admin/reconcile", post(reconcile))
        .route("/settings", get(get_settings).put(put_settings))
}
