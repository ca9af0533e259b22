//! CRUD lifecycle over the HTTP surface.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::{send, test_app};

#[tokio::test]
async fn create_read_roundtrip() {
    let app = test_app();
    let (status, headers, body) = send(
        &app,
        "POST",
        "/Patient",
        Some(json!({"resourceType": "Patient", "name": [{"family": "Smith"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["meta"]["versionId"], "1");
    assert!(headers.get("location").is_some());
    assert_eq!(headers.get("etag").unwrap(), "W/\"1\"");
    assert!(headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/fhir+json"));

    let id = body["id"].as_str().unwrap();
    let (status, _, fetched) = send(&app, "GET", &format!("/Patient/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"][0]["family"], "Smith");
}

#[tokio::test]
async fn read_of_unknown_resource_is_404_outcome() {
    let app = test_app();
    let (status, _, body) = send(&app, "GET", "/Patient/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["resourceType"], "OperationOutcome");
    assert_eq!(body["issue"][0]["code"], "not-found");
}

#[tokio::test]
async fn put_creates_then_updates() {
    let app = test_app();
    let (status, _, body) = send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient", "gender": "male"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["meta"]["versionId"], "1");

    let (status, headers, body) = send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient", "gender": "female"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["versionId"], "2");
    assert_eq!(headers.get("etag").unwrap(), "W/\"2\"");
    assert_eq!(body["gender"], "female");
}

#[tokio::test]
async fn audit_tag_tracks_the_last_writer() {
    let app = test_app();
    send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient"})),
    )
    .await;
    let (_, _, body) = send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient"})),
    )
    .await;
    let tags = body["meta"]["tag"].as_array().unwrap();
    let audit: Vec<_> = tags
        .iter()
        .filter(|t| t["system"].as_str().unwrap_or("").contains("corundum"))
        .collect();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0]["code"], "updated-by");
}

#[tokio::test]
async fn delete_then_read_is_410_with_etag() {
    let app = test_app();
    send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient"})),
    )
    .await;
    let (status, _, _) = send(&app, "DELETE", "/Patient/p1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, headers, body) = send(&app, "GET", "/Patient/p1", None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["issue"][0]["code"], "deleted");
    assert_eq!(headers.get("etag").unwrap(), "W/\"2\"");
}

#[tokio::test]
async fn delete_is_idempotent_over_http() {
    let app = test_app();
    send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient"})),
    )
    .await;
    let (first, _, _) = send(&app, "DELETE", "/Patient/p1", None).await;
    let (second, _, _) = send(&app, "DELETE", "/Patient/p1", None).await;
    let (missing, _, _) = send(&app, "DELETE", "/Patient/never-existed", None).await;
    assert_eq!(first, StatusCode::NO_CONTENT);
    assert_eq!(second, StatusCode::NO_CONTENT);
    assert_eq!(missing, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn update_after_delete_is_a_conflict() {
    let app = test_app();
    send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient"})),
    )
    .await;
    send(&app, "DELETE", "/Patient/p1", None).await;

    let (status, _, body) = send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["issue"][0]["code"], "conflict");
}

#[tokio::test]
async fn patch_applies_and_bumps_version() {
    let app = test_app();
    send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient", "active": false})),
    )
    .await;
    let (status, _, body) = send(
        &app,
        "PATCH",
        "/Patient/p1",
        Some(json!([{"op": "replace", "path": "/active", "value": true}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["meta"]["versionId"], "2");
}

#[tokio::test]
async fn history_and_vread_expose_versions() {
    let app = test_app();
    send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient", "gender": "male"})),
    )
    .await;
    send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Patient", "gender": "female"})),
    )
    .await;
    send(&app, "DELETE", "/Patient/p1", None).await;

    let (status, _, history) = send(&app, "GET", "/Patient/p1/_history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["type"], "history");
    assert_eq!(history["total"], 3);
    // Newest first, and the tombstone shows as a DELETE
    assert_eq!(history["entry"][0]["request"]["method"], "DELETE");

    let (status, _, v1) = send(&app, "GET", "/Patient/p1/_history/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v1["gender"], "male");
}

#[tokio::test]
async fn mismatched_body_type_is_rejected() {
    let app = test_app();
    let (status, _, body) = send(
        &app,
        "PUT",
        "/Patient/p1",
        Some(json!({"resourceType": "Observation"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");
}

#[tokio::test]
async fn unknown_tenant_is_rejected_before_handlers() {
    let app = test_app();
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/Patient/p1")
        .header("x-tenant", "nonexistent")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::util::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
