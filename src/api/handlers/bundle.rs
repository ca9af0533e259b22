//! Bundle endpoint: POST / with a transaction or batch Bundle.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::{Extension, Json};
use serde_json::Value as JsonValue;

use super::crud::fhir_json;
use crate::db::traits::Datastore;
use crate::request_context::TenantContext;
use crate::state::AppState;
use crate::Result;

pub async fn process<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Json(bundle): Json<JsonValue>,
) -> Result<Response> {
    let bucket = state.bucket_for(&ctx)?;
    let response = state.bundles.process(&ctx, &bucket, bundle).await?;
    Ok(fhir_json(StatusCode::OK, response))
}
