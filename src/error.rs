//! Error types for the FHIR server

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Resource not found: {resource_type}/{id}")]
    ResourceNotFound { resource_type: String, id: String },

    #[error("Resource deleted: {resource_type}/{id}")]
    ResourceDeleted {
        resource_type: String,
        id: String,
        version_id: Option<i32>,
    },

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Unknown or inconsistent search parameter, rejected before query execution.
    #[error("Search parameter validation failed: {0}")]
    SearchValidation(String),

    /// Malformed search parameter value (bad date, bad number, ...).
    #[error("Invalid parameter value: {0}")]
    InvalidParameter(String),

    /// Resource failed validation against the bucket's profile configuration.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Unsupported Bundle type: {0}")]
    InvalidBundleType(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message, etag) = match &self {
            Error::ResourceNotFound { .. } => (StatusCode::NOT_FOUND, self.to_string(), None),
            Error::ResourceDeleted { version_id, .. } => {
                (StatusCode::GONE, self.to_string(), *version_id)
            }
            Error::InvalidResource(_)
            | Error::SearchValidation(_)
            | Error::InvalidParameter(_)
            | Error::InvalidBundleType(_)
            | Error::UnknownTenant(_) => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Error::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string(), None),
            Error::VersionConflict(_) => (StatusCode::CONFLICT, self.to_string(), None),
            Error::UnsupportedOperation(_) => {
                (StatusCode::METHOD_NOT_ALLOWED, self.to_string(), None)
            }
            Error::Database(_) | Error::Internal(_) | Error::Other(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = Json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": status_to_fhir_code(status),
                "diagnostics": error_message
            }]
        }));

        let mut response = (status, body).into_response();

        // Always emit a FHIR content type for OperationOutcome errors.
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json; charset=utf-8"),
        );

        // Per FHIR spec: MAY include ETag on deleted resource errors
        if let Some(version_id) = etag {
            let etag_value = format!("W/\"{}\"", version_id);
            if let Ok(header_value) = etag_value.parse() {
                response.headers_mut().insert(header::ETAG, header_value);
            }
        }

        response
    }
}

fn status_to_fhir_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "invalid",
        StatusCode::NOT_FOUND => "not-found",
        StatusCode::GONE => "deleted",
        StatusCode::METHOD_NOT_ALLOWED => "not-supported",
        StatusCode::CONFLICT => "conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "processing",
        _ => "exception",
    }
}

/// Build an OperationOutcome JSON body for an error, used in batch-response
/// bundle entries where the error must travel inside the bundle.
pub fn operation_outcome(error: &Error) -> serde_json::Value {
    let status = match error {
        Error::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
        Error::ResourceDeleted { .. } => StatusCode::GONE,
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::VersionConflict(_) => StatusCode::CONFLICT,
        Error::UnsupportedOperation(_) => StatusCode::METHOD_NOT_ALLOWED,
        Error::Database(_) | Error::Internal(_) | Error::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    };
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": status_to_fhir_code(status),
            "diagnostics": error.to_string()
        }]
    })
}

/// HTTP status line (e.g. "404 Not Found") for a bundle entry response.
pub fn status_line(error: &Error) -> &'static str {
    match error {
        Error::ResourceNotFound { .. } => "404 Not Found",
        Error::ResourceDeleted { .. } => "410 Gone",
        Error::Validation(_) => "422 Unprocessable Entity",
        Error::VersionConflict(_) => "409 Conflict",
        Error::UnsupportedOperation(_) => "405 Method Not Allowed",
        Error::Database(_) | Error::Internal(_) | Error::Other(_) => "500 Internal Server Error",
        _ => "400 Bad Request",
    }
}
