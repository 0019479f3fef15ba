//! Batch and item routes
//!
//! POST /batches, GET /batches, GET /batches/:id,
//! POST /batches/:id/rows, POST /batches/:id/file,
//! POST /batches/:id/revalidate, POST /batches/:id/confirm,
//! POST /batches/:id/promote, GET /batches/:id/items,
//! GET /batches/:id/errors.csv, PATCH /items/:id

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::TenantContext;
use crate::error::{ApiError, ApiResult};
use crate::models::{Batch, BatchStatus, Item, ItemStatus, NewBatch};
use crate::parsers::FileInput;
use crate::promotion::{PromoteRequest, PromotionSummary};
use crate::services::{ConfirmReport, ConfirmRequest, IngestReport, ItemView, RevalidateReport};
use crate::AppState;

/// Upload size accepted on the file route
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const FILE_NAME_HEADER: &str = "x-file-name";

#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub status: Option<BatchStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct IngestRowsRequest {
    pub rows: Vec<Map<String, Value>>,
    #[serde(default)]
    pub file_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Deserialize)]
pub struct PatchItemRequest {
    pub field: String,
    pub value: Value,
}

/// POST /batches
pub async fn create_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(params): Json<NewBatch>,
) -> ApiResult<(StatusCode, Json<Batch>)> {
    let batch = state.ingest.create_batch(&ctx.tenant_id, &ctx.user_id, params).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// GET /batches
pub async fn list_batches(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ListBatchesQuery>,
) -> ApiResult<Json<Vec<Batch>>> {
    let batches = state
        .ingest
        .list_batches(&ctx.tenant_id, query.status, query.limit, query.offset)
        .await?;
    Ok(Json(batches))
}

/// GET /batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<Batch>> {
    Ok(Json(state.ingest.get_batch(&ctx.tenant_id, batch_id).await?))
}

/// POST /batches/:id/rows
pub async fn ingest_rows(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<IngestRowsRequest>,
) -> ApiResult<Json<IngestReport>> {
    let cancel = state.shutdown.child_token();
    let report = state
        .ingest
        .ingest_rows(&ctx.tenant_id, batch_id, request.rows, request.file_key, &cancel)
        .await?;
    Ok(Json(report))
}

/// POST /batches/:id/file
///
/// Raw request body; the original name travels in `X-File-Name` and the
/// declared format in `Content-Type`.
pub async fn ingest_file(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IngestReport>> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }
    let file_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing X-File-Name header".into()))?
        .to_string();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let file = FileInput::new(file_name, body.to_vec()).with_content_type(content_type);
    let cancel = state.shutdown.child_token();
    let report = state.ingest.ingest_file(&ctx.tenant_id, batch_id, file, &cancel).await?;
    Ok(Json(report))
}

/// POST /batches/:id/revalidate
pub async fn revalidate_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<RevalidateReport>> {
    Ok(Json(state.ingest.revalidate_batch(&ctx.tenant_id, batch_id).await?))
}

/// POST /batches/:id/confirm
pub async fn confirm_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
    request: Option<Json<ConfirmRequest>>,
) -> ApiResult<Json<ConfirmReport>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let report = state
        .review
        .confirm_batch(&ctx.tenant_id, &ctx.user_id, batch_id, request)
        .await?;
    Ok(Json(report))
}

/// POST /batches/:id/promote
pub async fn promote_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
    request: Option<Json<PromoteRequest>>,
) -> ApiResult<Json<PromotionSummary>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let summary = state.promotion.promote_batch(&ctx.tenant_id, batch_id, &request).await?;
    Ok(Json(summary))
}

/// GET /batches/:id/items
pub async fn list_items(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
    Query(query): Query<ItemsQuery>,
) -> ApiResult<Json<Vec<ItemView>>> {
    Ok(Json(state.review.list_items(&ctx.tenant_id, batch_id, query.status).await?))
}

/// GET /batches/:id/errors.csv
pub async fn export_errors(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let csv = state.review.export_errors_csv(&ctx.tenant_id, batch_id).await?;
    let disposition = format!("attachment; filename=\"batch-{}-errors.csv\"", batch_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    ))
}

/// PATCH /items/:id
pub async fn patch_item(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(item_id): Path<Uuid>,
    Json(request): Json<PatchItemRequest>,
) -> ApiResult<Json<Item>> {
    let item = state
        .review
        .patch_item(&ctx.tenant_id, &ctx.user_id, item_id, &request.field, request.value)
        .await?;
    Ok(Json(item))
}

/// Build batch and item routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(create_batch).get(list_batches))
        .route("/batches/:id", get(get_batch))
        .route("/batches/:id/rows", post(ingest_rows))
        .route(
            "/batches/:id/file",
            post(ingest_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/batches/:id/revalidate", post(revalidate_batch))
        .route("/batches/:id/confirm", post(confirm_batch))
        .route("/batches/:id/promote", post(promote_batch))
        .route("/batches/:id/items", get(list_items))
        .route("/batches/:id/errors.csv", get(export_errors))
        .route("/items/:id", patch(patch_item))
}
