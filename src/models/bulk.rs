//! Bulk import job documents
//!
//! Jobs are persisted through the resource store under the reserved
//! `BulkImportJob` type so they survive restarts and stay tenant-scoped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const BULK_JOB_RESOURCE_TYPE: &str = "BulkImportJob";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BulkJobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A single NDJSON source to import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkImportSource {
    /// Declared resource type of the file's contents.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Local path or file:// URL of the NDJSON file.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJob {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    pub id: String,
    pub status: BulkJobStatus,
    pub sources: Vec<BulkImportSource>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub resources_imported: u64,
    pub resources_failed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

impl BulkJob {
    pub fn new(sources: Vec<BulkImportSource>) -> Self {
        Self {
            resource_type: BULK_JOB_RESOURCE_TYPE.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            status: BulkJobStatus::Pending,
            sources,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            resources_imported: 0,
            resources_failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            BulkJobStatus::Completed | BulkJobStatus::Failed
        )
    }
}
