//! Transaction and batch Bundles posted to the server root.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::{send, test_app};

#[tokio::test]
async fn transaction_commits_all_entries() {
    let app = test_app();
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "resource": {"resourceType": "Patient", "gender": "male"},
                "request": {"method": "PUT", "url": "Patient/p1"}
            },
            {
                "resource": {
                    "resourceType": "Observation",
                    "status": "final",
                    "code": {"coding": [{"code": "x"}]},
                    "subject": {"reference": "Patient/p1"}
                },
                "request": {"method": "POST", "url": "Observation"}
            }
        ]
    });

    let (status, _, response) = send(&app, "POST", "/", Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["type"], "transaction-response");
    let entries = response["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["response"]["status"], "201 Created");
    assert_eq!(entries[1]["response"]["status"], "201 Created");
    assert_eq!(entries[0]["response"]["etag"], "W/\"1\"");

    let (status, _, _) = send(&app, "GET", "/Patient/p1", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn failed_transaction_leaves_no_trace() {
    let app = test_app();
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "resource": {"resourceType": "Patient"},
                "request": {"method": "PUT", "url": "Patient/p1"}
            },
            {
                "resource": {"resourceType": "Observation"},
                "request": {"method": "PUT", "url": "Patient/p2"}
            }
        ]
    });

    let (status, _, body) = send(&app, "POST", "/", Some(bundle)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");

    let (status, _, _) = send(&app, "GET", "/Patient/p1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_reports_per_entry_outcomes() {
    let app = test_app();
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {
                "resource": {"resourceType": "Patient"},
                "request": {"method": "PUT", "url": "Patient/p1"}
            },
            {
                "resource": {"resourceType": "Observation"},
                "request": {"method": "PUT", "url": "Patient/p2"}
            }
        ]
    });

    let (status, _, response) = send(&app, "POST", "/", Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["type"], "batch-response");
    let entries = response["entry"].as_array().unwrap();
    assert_eq!(entries[0]["response"]["status"], "201 Created");
    assert_eq!(entries[1]["response"]["status"], "400 Bad Request");
    assert_eq!(
        entries[1]["response"]["outcome"]["resourceType"],
        "OperationOutcome"
    );

    // The good entry survived the bad one
    let (status, _, _) = send(&app, "GET", "/Patient/p1", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn urn_placeholders_resolve_across_entries() {
    let app = test_app();
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "fullUrl": "urn:uuid:patient-placeholder",
                "resource": {"resourceType": "Patient", "gender": "female"},
                "request": {"method": "POST", "url": "Patient"}
            },
            {
                "resource": {
                    "resourceType": "Observation",
                    "status": "final",
                    "code": {"coding": [{"code": "x"}]},
                    "subject": {"reference": "urn:uuid:patient-placeholder"}
                },
                "request": {"method": "POST", "url": "Observation"}
            }
        ]
    });

    let (status, _, response) = send(&app, "POST", "/", Some(bundle)).await;
    assert_eq!(status, StatusCode::OK);
    let entries = response["entry"].as_array().unwrap();
    let patient_id = entries[0]["resource"]["id"].as_str().unwrap();
    let subject = entries[1]["resource"]["subject"]["reference"]
        .as_str()
        .unwrap();
    assert_eq!(subject, format!("Patient/{patient_id}"));

    // The stored Observation is searchable by the resolved reference
    let (_, _, found) = send(
        &app,
        "GET",
        &format!("/Observation?patient={patient_id}"),
        None,
    )
    .await;
    assert_eq!(found["entry"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn non_bundle_body_and_bad_type_are_rejected() {
    let app = test_app();
    let (status, _, _) = send(&app, "POST", "/", Some(json!({"resourceType": "Patient"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(
        &app,
        "POST",
        "/",
        Some(json!({"resourceType": "Bundle", "type": "searchset", "entry": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");
}
