//! Audit tags written into `meta.tag`
//!
//! Every write stamps exactly one tag under the server's tag system;
//! the meta orchestrator replaces any previous tag with that system so
//! audit tags never accumulate across versions.

use serde_json::{json, Value as JsonValue};

pub const AUDIT_TAG_SYSTEM: &str = "http://corundum.fhir.dev/fhir/tags";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOp {
    Create,
    Update,
    Delete,
}

impl AuditOp {
    pub fn code(&self) -> &'static str {
        match self {
            AuditOp::Create => "created-by",
            AuditOp::Update => "updated-by",
            AuditOp::Delete => "deleted-by",
        }
    }
}

pub fn audit_tag(op: AuditOp, user: &str) -> JsonValue {
    json!({
        "system": AUDIT_TAG_SYSTEM,
        "code": op.code(),
        "display": user,
    })
}

/// True for tags owned by the audit system (and therefore replaced on
/// every write).
pub fn is_audit_tag(tag: &JsonValue) -> bool {
    tag.get("system").and_then(|s| s.as_str()) == Some(AUDIT_TAG_SYSTEM)
}
