//! HTTP API handlers for tally-imports
//!
//! Every route is tenant-scoped: the caller identity comes from the
//! `X-Tenant-Id` / `X-User-Id` headers, admin routes also need
//! `X-Role: admin`.

pub mod admin;
pub mod batches;
pub mod feedback;
pub mod health;
pub mod mappings;

pub use admin::admin_routes;
pub use batches::batch_routes;
pub use feedback::feedback_routes;
pub use health::health_routes;
pub use mappings::mapping_routes;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::{ApiError, ApiResult};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-role";

/// Caller identity taken from request headers
#[derive(Debug, Clone, PartialEq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: String,
    pub is_admin: bool,
}

impl TenantContext {
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin role required".into()))
        }
    }
}

/// Tenant ids end up in storage keys; keep them to a plain charset
fn valid_tenant_id(tenant_id: &str) -> bool {
    tenant_id.len() <= 64
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !tenant_id.starts_with('.')
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let tenant_id = header(TENANT_HEADER).ok_or_else(|| ApiError::Unauthorized("missing X-Tenant-Id header".into()))?;
        if !valid_tenant_id(&tenant_id) {
            return Err(ApiError::BadRequest(format!("invalid tenant id: {}", tenant_id)));
        }
        let user_id = header(USER_HEADER).ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".into()))?;
        let is_admin = header(ROLE_HEADER).is_some_and(|role| role.eq_ignore_ascii_case("admin"));

        Ok(Self {
            tenant_id,
            user_id,
            is_admin,
        })
    }
}
