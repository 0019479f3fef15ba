//! Mapping template CRUD
//!
//! GET/POST /mappings, GET/PUT/DELETE /mappings/:id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use super::TenantContext;
use crate::db::{batches, mappings};
use crate::error::{ApiError, ApiResult};
use crate::models::{Mapping, MappingInput};
use crate::AppState;

fn validate_input(input: &MappingInput) -> ApiResult<()> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("mapping name must not be empty".into()));
    }
    if let Some(field) = input.fields.iter().find(|(_, sources)| sources.is_empty()).map(|(f, _)| f) {
        return Err(ApiError::BadRequest(format!("field '{}' lists no source columns", field)));
    }
    Ok(())
}

/// GET /mappings
pub async fn list_mappings(State(state): State<AppState>, ctx: TenantContext) -> ApiResult<Json<Vec<Mapping>>> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(mappings::list_mappings(&mut conn, &ctx.tenant_id).await?))
}

/// POST /mappings
pub async fn create_mapping(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(input): Json<MappingInput>,
) -> ApiResult<(StatusCode, Json<Mapping>)> {
    validate_input(&input)?;
    let mapping = Mapping::from_input(&ctx.tenant_id, input);
    let mut conn = state.db.acquire().await?;
    mappings::insert_mapping(&mut conn, &mapping).await?;
    tracing::info!(
        mapping_id = %mapping.id,
        tenant_id = %ctx.tenant_id,
        name = %mapping.name,
        source_type = %mapping.source_type,
        "Mapping created"
    );
    Ok((StatusCode::CREATED, Json(mapping)))
}

/// GET /mappings/:id
pub async fn get_mapping(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(mapping_id): Path<Uuid>,
) -> ApiResult<Json<Mapping>> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(mappings::require_mapping(&mut conn, &ctx.tenant_id, mapping_id).await?))
}

/// PUT /mappings/:id
///
/// Replaces the template and bumps its version. Batches pick the new
/// version up on their next revalidation.
pub async fn update_mapping(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(mapping_id): Path<Uuid>,
    Json(input): Json<MappingInput>,
) -> ApiResult<Json<Mapping>> {
    validate_input(&input)?;
    let mut conn = state.db.acquire().await?;
    let mut mapping = mappings::require_mapping(&mut conn, &ctx.tenant_id, mapping_id).await?;
    mapping.apply_update(input);
    mappings::update_mapping(&mut conn, &mapping).await?;
    tracing::info!(mapping_id = %mapping_id, version = mapping.version, "Mapping updated");
    Ok(Json(mapping))
}

/// DELETE /mappings/:id
///
/// Refused with 409 while any batch references the template.
pub async fn delete_mapping(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(mapping_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.db.acquire().await?;
    let referencing = batches::count_referencing_mapping(&mut conn, &ctx.tenant_id, mapping_id).await?;
    if referencing > 0 {
        return Err(ApiError::Conflict(format!(
            "mapping {} is referenced by {} batches",
            mapping_id, referencing
        )));
    }
    if !mappings::delete_mapping(&mut conn, &ctx.tenant_id, mapping_id).await? {
        return Err(ApiError::NotFound(format!("mapping {}", mapping_id)));
    }
    tracing::info!(mapping_id = %mapping_id, "Mapping deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Build mapping routes
pub fn mapping_routes() -> Router<AppState> {
    Router::new()
        .route("/mappings", get(list_mappings).post(create_mapping))
        .route(
            "/mappings/:id",
            get(get_mapping).put(update_mapping).delete(delete_mapping),
        )
}
