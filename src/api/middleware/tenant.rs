//! Tenant resolution
//!
//! Resolves the tenant from `x-tenant` (falling back to the configured
//! default), rejects unknown tenants before any handler runs, and
//! builds the `TenantContext` every downstream call receives.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::request_id::RequestId;
use crate::db::traits::Datastore;
use crate::request_context::TenantContext;
use crate::state::AppState;
use crate::{Error, Result};

pub const TENANT_HEADER: &str = "x-tenant";
pub const USER_HEADER: &str = "x-user";

pub async fn tenant_middleware<S: Datastore>(
    State(state): State<AppState<S>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let tenant = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.config.tenants.default_tenant.clone());

    if state.config.tenants.resolve_bucket(&tenant).is_none() {
        return Err(Error::UnknownTenant(tenant));
    }

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let mut ctx = TenantContext::new(tenant, request_id);
    if let Some(user) = request
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        ctx = ctx.with_user(user);
    }
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
