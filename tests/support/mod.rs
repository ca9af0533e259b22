//! Shared helpers for the HTTP integration suites: an app wired to the
//! in-memory store plus a small request driver.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value as JsonValue;
use tower::util::ServiceExt;

use corundum::config::Config;
use corundum::db::memory::InMemoryResourceStore;
use corundum::state::AppState;

pub struct TestApp {
    pub router: Router,
    pub store: InMemoryResourceStore,
}

pub fn test_app() -> TestApp {
    let config = Arc::new(Config::default());
    let store = InMemoryResourceStore::new();
    let state = AppState::new(config, store.clone());
    TestApp {
        router: corundum::api::router(state),
        store,
    }
}

pub async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    body: Option<JsonValue>,
) -> (StatusCode, HeaderMap, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, headers, body)
}

pub async fn put_resource(
    app: &TestApp,
    resource_type: &str,
    id: &str,
    body: JsonValue,
) -> JsonValue {
    let (status, _, response) =
        send(app, "PUT", &format!("/{resource_type}/{id}"), Some(body)).await;
    assert!(
        status == StatusCode::CREATED || status == StatusCode::OK,
        "unexpected status {status} storing {resource_type}/{id}: {response}"
    );
    response
}
