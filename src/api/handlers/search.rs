//! Search handler

use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Extension;

use super::crud::fhir_json;
use crate::db::search::params::SearchParameters;
use crate::db::traits::Datastore;
use crate::request_context::TenantContext;
use crate::state::AppState;
use crate::Result;

/// GET /{type}?... The raw query is parsed here so parameter order is
/// preserved exactly as sent.
pub async fn search<S: Datastore>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<TenantContext>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let items: Vec<(String, String)> = query
        .as_deref()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();
    let params = SearchParameters::from_items(&items)?;
    let bundle = state
        .search
        .search(&ctx, &resource_type, &params, query.as_deref())
        .await?;
    Ok(fhir_json(StatusCode::OK, bundle))
}
