//! Core resource envelope shared by the storage backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A stored resource version. One envelope per version; the head of a
/// resource is the single version with `is_current = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub version_id: i32,
    /// Full FHIR JSON body. For tombstones this is the minimal
    /// `{resourceType, id, meta}` document written by the delete path.
    pub resource: JsonValue,
    pub last_updated: DateTime<Utc>,
    pub deleted: bool,
}

impl Resource {
    /// Weak ETag for this version, e.g. `W/"3"`.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version_id)
    }
}

/// Outcome of a write operation, drives the HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOperation {
    Created,
    Updated,
    Deleted,
    NoOp,
}

impl ResourceOperation {
    pub fn status_code(&self) -> axum::http::StatusCode {
        match self {
            ResourceOperation::Created => axum::http::StatusCode::CREATED,
            ResourceOperation::Updated => axum::http::StatusCode::OK,
            ResourceOperation::Deleted | ResourceOperation::NoOp => {
                axum::http::StatusCode::NO_CONTENT
            }
        }
    }

    /// Status line for bundle entry responses ("201 Created", ...).
    pub fn status_line(&self) -> &'static str {
        match self {
            ResourceOperation::Created => "201 Created",
            ResourceOperation::Updated => "200 OK",
            ResourceOperation::Deleted | ResourceOperation::NoOp => "204 No Content",
        }
    }
}

/// Read `meta.versionId` from a resource body, if present and numeric.
pub fn body_version_id(body: &JsonValue) -> Option<i32> {
    body.get("meta")
        .and_then(|m| m.get("versionId"))
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse().ok())
}

/// Read `meta.lastUpdated` from a resource body.
pub fn body_last_updated(body: &JsonValue) -> Option<DateTime<Utc>> {
    body.get("meta")
        .and_then(|m| m.get("lastUpdated"))
        .and_then(|v| v.as_str())
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
