//! Resource CRUD handlers

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{json, Value as JsonValue};

use crate::db::traits::Datastore;
use crate::models::fhir::Resource;
use crate::request_context::TenantContext;
use crate::state::AppState;
use crate::{Error, Result};

pub const FHIR_CONTENT_TYPE: &str = "application/fhir+json; charset=utf-8";

/// Wrap a FHIR JSON body with the right content type and version
/// headers.
pub fn resource_response(status: StatusCode, resource: &Resource) -> Response {
    let mut response = (status, Json(resource.resource.clone())).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(FHIR_CONTENT_TYPE),
    );
    if let Ok(etag) = resource.etag().parse() {
        headers.insert(header::ETAG, etag);
    }
    let last_modified = resource
        .last_updated
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = last_modified.parse() {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

pub fn fhir_json(status: StatusCode, body: JsonValue) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(FHIR_CONTENT_TYPE),
    );
    response
}

pub async fn read<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Response> {
    match state
        .store
        .read_head(&ctx.tenant_id, &resource_type, &id)
        .await?
    {
        None => Err(Error::ResourceNotFound { resource_type, id }),
        Some(resource) if resource.deleted => Err(Error::ResourceDeleted {
            resource_type,
            id,
            version_id: Some(resource.version_id),
        }),
        Some(resource) => Ok(resource_response(StatusCode::OK, &resource)),
    }
}

pub async fn vread<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path((resource_type, id, version_id)): Path<(String, String, i32)>,
) -> Result<Response> {
    match state
        .store
        .read_version(&ctx.tenant_id, &resource_type, &id, version_id)
        .await?
    {
        None => Err(Error::ResourceNotFound { resource_type, id }),
        Some(resource) if resource.deleted => Err(Error::ResourceDeleted {
            resource_type,
            id,
            version_id: Some(resource.version_id),
        }),
        Some(resource) => Ok(resource_response(StatusCode::OK, &resource)),
    }
}

pub async fn history<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Response> {
    let versions = state
        .store
        .history(&ctx.tenant_id, &resource_type, &id)
        .await?;
    if versions.is_empty() {
        return Err(Error::ResourceNotFound { resource_type, id });
    }
    let entries: Vec<JsonValue> = versions
        .iter()
        .map(|v| {
            json!({
                "fullUrl": format!("{resource_type}/{}/_history/{}", v.id, v.version_id),
                "resource": v.resource,
                "request": {
                    "method": if v.deleted { "DELETE" } else { "PUT" },
                    "url": format!("{resource_type}/{}", v.id),
                },
            })
        })
        .collect();
    Ok(fhir_json(
        StatusCode::OK,
        json!({
            "resourceType": "Bundle",
            "type": "history",
            "total": entries.len(),
            "entry": entries,
        }),
    ))
}

pub async fn create<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path(resource_type): Path<String>,
    Json(body): Json<JsonValue>,
) -> Result<Response> {
    let bucket = state.bucket_for(&ctx)?;
    let resource = state
        .put
        .create(&ctx, &bucket, &resource_type, body)
        .await?;
    let mut response = resource_response(StatusCode::CREATED, &resource);
    let location = format!(
        "{}/{}/_history/{}",
        resource.resource_type, resource.id, resource.version_id
    );
    if let Ok(value) = location.parse() {
        response
            .headers_mut()
            .insert(axum::http::header::LOCATION, value);
    }
    Ok(response)
}

pub async fn update<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path((resource_type, id)): Path<(String, String)>,
    Json(body): Json<JsonValue>,
) -> Result<Response> {
    let bucket = state.bucket_for(&ctx)?;
    let (resource, operation) = state
        .put
        .update_or_create(&ctx, &bucket, &resource_type, &id, body)
        .await?;
    Ok(resource_response(operation.status_code(), &resource))
}

pub async fn patch<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path((resource_type, id)): Path<(String, String)>,
    Json(patch_document): Json<JsonValue>,
) -> Result<Response> {
    let bucket = state.bucket_for(&ctx)?;
    let resource = state
        .patch
        .patch(&ctx, &bucket, &resource_type, &id, patch_document)
        .await?;
    Ok(resource_response(StatusCode::OK, &resource))
}

pub async fn delete<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Response> {
    state.delete.delete(&ctx, &resource_type, &id).await?;
    // Idempotent: 204 whether or not a tombstone was written
    Ok(StatusCode::NO_CONTENT.into_response())
}
