//! HTTP surface: router, handlers, middleware.

pub mod handlers;
pub mod middleware;

use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::traits::Datastore;
use crate::state::AppState;
use handlers::crud::fhir_json;
use middleware::request_id::request_id_middleware;
use middleware::tenant::tenant_middleware;

pub fn router<S: Datastore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/", post(handlers::bundle::process::<S>))
        .route("/metadata", get(metadata))
        .route("/$import", post(handlers::bulk::import::<S>))
        .route(
            "/$import-status/:id",
            get(handlers::bulk::import_status::<S>),
        )
        .route(
            "/:resource_type",
            get(handlers::search::search::<S>).post(handlers::crud::create::<S>),
        )
        .route(
            "/:resource_type/:id",
            get(handlers::crud::read::<S>)
                .put(handlers::crud::update::<S>)
                .patch(handlers::crud::patch::<S>)
                .delete(handlers::crud::delete::<S>),
        )
        .route(
            "/:resource_type/:id/_history",
            get(handlers::crud::history::<S>),
        )
        .route(
            "/:resource_type/:id/_history/:version_id",
            get(handlers::crud::vread::<S>),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            tenant_middleware::<S>,
        ))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Minimal CapabilityStatement: enough for clients to discover the
/// supported interactions.
async fn metadata() -> Response {
    let resource_types = [
        "Patient",
        "Observation",
        "Practitioner",
        "Encounter",
        "Condition",
        "Organization",
        "DiagnosticReport",
        "MedicationRequest",
    ];
    let rest_resources: Vec<serde_json::Value> = resource_types
        .iter()
        .map(|rt| {
            json!({
                "type": rt,
                "versioning": "versioned",
                "interaction": [
                    {"code": "read"},
                    {"code": "vread"},
                    {"code": "update"},
                    {"code": "patch"},
                    {"code": "delete"},
                    {"code": "create"},
                    {"code": "search-type"},
                    {"code": "history-instance"},
                ],
            })
        })
        .collect();
    fhir_json(
        StatusCode::OK,
        json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "kind": "instance",
            "fhirVersion": "4.0.1",
            "format": ["application/fhir+json"],
            "rest": [{
                "mode": "server",
                "resource": rest_resources,
                "interaction": [{"code": "transaction"}, {"code": "batch"}],
            }],
        }),
    )
}
