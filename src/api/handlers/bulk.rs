//! Bulk import endpoints

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use serde_json::{json, Value as JsonValue};

use super::crud::fhir_json;
use crate::db::traits::Datastore;
use crate::models::bulk::BulkJobStatus;
use crate::request_context::TenantContext;
use crate::state::AppState;
use crate::Result;

/// POST /$import: accept the job and point the client at the status
/// endpoint.
pub async fn import<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Json(parameters): Json<JsonValue>,
) -> Result<Response> {
    let job = state.bulk.submit(&ctx, parameters).await?;
    let mut response = fhir_json(
        StatusCode::ACCEPTED,
        json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "information",
                "code": "informational",
                "diagnostics": format!("bulk import job {} accepted", job.id),
            }]
        }),
    );
    let location = format!("/$import-status/{}", job.id);
    if let Ok(value) = location.parse() {
        response
            .headers_mut()
            .insert(header::CONTENT_LOCATION, value);
    }
    Ok(response)
}

/// GET /$import-status/{id}: 202 while the job is queued or running,
/// 200 with the final tallies once it settles.
pub async fn import_status<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Response> {
    let job = state.bulk.status(&ctx, &id).await?;
    let status = if job.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let mut body = json!({
        "jobId": job.id,
        "status": job.status,
        "submittedAt": job.submitted_at,
        "resourcesImported": job.resources_imported,
        "resourcesFailed": job.resources_failed,
    });
    if let Some(started) = job.started_at {
        body["startedAt"] = json!(started);
    }
    if let Some(completed) = job.completed_at {
        body["completedAt"] = json!(completed);
    }
    if job.status == BulkJobStatus::Failed || !job.errors.is_empty() {
        body["errors"] = json!(job.errors);
    }
    Ok(fhir_json(status, body))
}
