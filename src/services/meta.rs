//! Meta orchestration
//!
//! Single place that mutates `meta` on the way into storage: version
//! assignment, `lastUpdated`, profile set-union, and audit tag
//! replacement. Services decide the operation and (usually) the
//! version; the orchestrator applies the rules.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value as JsonValue};

use crate::models::fhir::body_version_id;
use crate::services::audit::{audit_tag, is_audit_tag, AuditOp};

#[derive(Debug, Clone)]
pub struct MetaRequest {
    pub op: AuditOp,
    /// Version decided by the caller from the stored head. When absent
    /// the orchestrator falls back to the body's own version.
    pub version_id: Option<i32>,
    /// Preserve a source timestamp instead of stamping now (bulk
    /// import).
    pub last_updated: Option<DateTime<Utc>>,
    /// Profiles to merge into `meta.profile`.
    pub profiles: Vec<String>,
    pub user: String,
}

impl MetaRequest {
    pub fn for_create(user: &str) -> Self {
        Self {
            op: AuditOp::Create,
            version_id: None,
            last_updated: None,
            profiles: Vec::new(),
            user: user.to_string(),
        }
    }

    pub fn for_update(user: &str, version_id: i32) -> Self {
        Self {
            op: AuditOp::Update,
            version_id: Some(version_id),
            last_updated: None,
            profiles: Vec::new(),
            user: user.to_string(),
        }
    }

    pub fn for_delete(user: &str, version_id: i32) -> Self {
        Self {
            op: AuditOp::Delete,
            version_id: Some(version_id),
            last_updated: None,
            profiles: Vec::new(),
            user: user.to_string(),
        }
    }

    pub fn preserving_last_updated(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_updated = at;
        self
    }

    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AppliedMeta {
    pub version_id: i32,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MetaOrchestrator;

impl MetaOrchestrator {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, body: &mut JsonValue, request: &MetaRequest) -> AppliedMeta {
        let version_id = self.determine_version(body, request);
        let last_updated = request.last_updated.unwrap_or_else(Utc::now);

        let meta = ensure_meta(body);
        meta.insert("versionId".to_string(), json!(version_id.to_string()));
        meta.insert(
            "lastUpdated".to_string(),
            json!(last_updated.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        merge_profiles(meta, &request.profiles);
        replace_audit_tag(meta, request.op, &request.user);

        AppliedMeta {
            version_id,
            last_updated,
        }
    }

    /// CREATE is always version 1. UPDATE and DELETE take the caller's
    /// version; without one they continue from the body's own version,
    /// defaulting to 2 (update) or 1 (delete) when that is absent too.
    fn determine_version(&self, body: &JsonValue, request: &MetaRequest) -> i32 {
        match request.op {
            AuditOp::Create => 1,
            AuditOp::Update => request
                .version_id
                .or_else(|| body_version_id(body).map(|v| v + 1))
                .unwrap_or(2),
            AuditOp::Delete => request
                .version_id
                .or_else(|| body_version_id(body).map(|v| v + 1))
                .unwrap_or(1),
        }
    }
}

fn ensure_meta(body: &mut JsonValue) -> &mut Map<String, JsonValue> {
    if !body.get("meta").is_some_and(|m| m.is_object()) {
        body["meta"] = json!({});
    }
    body["meta"].as_object_mut().unwrap()
}

/// Set-union preserving existing order; new profiles append.
fn merge_profiles(meta: &mut Map<String, JsonValue>, profiles: &[String]) {
    if profiles.is_empty() {
        return;
    }
    let mut existing: Vec<JsonValue> = meta
        .get("profile")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();
    for profile in profiles {
        if !existing.iter().any(|p| p.as_str() == Some(profile)) {
            existing.push(json!(profile));
        }
    }
    meta.insert("profile".to_string(), JsonValue::Array(existing));
}

fn replace_audit_tag(meta: &mut Map<String, JsonValue>, op: AuditOp, user: &str) {
    let mut tags: Vec<JsonValue> = meta
        .get("tag")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();
    tags.retain(|t| !is_audit_tag(t));
    tags.push(audit_tag(op, user));
    meta.insert("tag".to_string(), JsonValue::Array(tags));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit::AUDIT_TAG_SYSTEM;

    #[test]
    fn create_is_always_version_one() {
        let orchestrator = MetaOrchestrator::new();
        let mut body = json!({"resourceType": "Patient", "meta": {"versionId": "9"}});
        let applied = orchestrator.apply(&mut body, &MetaRequest::for_create("alice"));
        assert_eq!(applied.version_id, 1);
        assert_eq!(body["meta"]["versionId"], "1");
    }

    #[test]
    fn update_takes_caller_version() {
        let orchestrator = MetaOrchestrator::new();
        let mut body = json!({"resourceType": "Patient"});
        let applied = orchestrator.apply(&mut body, &MetaRequest::for_update("alice", 4));
        assert_eq!(applied.version_id, 4);
    }

    #[test]
    fn update_without_version_continues_from_body() {
        let orchestrator = MetaOrchestrator::new();
        let mut body = json!({"resourceType": "Patient", "meta": {"versionId": "3"}});
        let request = MetaRequest {
            version_id: None,
            ..MetaRequest::for_update("alice", 0)
        };
        let applied = orchestrator.apply(&mut body, &request);
        assert_eq!(applied.version_id, 4);
    }

    #[test]
    fn update_without_any_version_defaults_to_two() {
        let orchestrator = MetaOrchestrator::new();
        let mut body = json!({"resourceType": "Patient"});
        let request = MetaRequest {
            version_id: None,
            ..MetaRequest::for_update("alice", 0)
        };
        let applied = orchestrator.apply(&mut body, &request);
        assert_eq!(applied.version_id, 2);
    }

    #[test]
    fn audit_tag_is_replaced_not_accumulated() {
        let orchestrator = MetaOrchestrator::new();
        let mut body = json!({"resourceType": "Patient"});
        orchestrator.apply(&mut body, &MetaRequest::for_create("alice"));
        orchestrator.apply(&mut body, &MetaRequest::for_update("bob", 2));

        let tags = body["meta"]["tag"].as_array().unwrap();
        let audit_tags: Vec<_> = tags
            .iter()
            .filter(|t| t["system"] == AUDIT_TAG_SYSTEM)
            .collect();
        assert_eq!(audit_tags.len(), 1);
        assert_eq!(audit_tags[0]["code"], "updated-by");
        assert_eq!(audit_tags[0]["display"], "bob");
    }

    #[test]
    fn foreign_tags_survive_audit_replacement() {
        let orchestrator = MetaOrchestrator::new();
        let mut body = json!({
            "resourceType": "Patient",
            "meta": {"tag": [{"system": "http://example.org/tags", "code": "vip"}]}
        });
        orchestrator.apply(&mut body, &MetaRequest::for_create("alice"));
        let tags = body["meta"]["tag"].as_array().unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0]["code"], "vip");
    }

    #[test]
    fn profiles_merge_as_a_set() {
        let orchestrator = MetaOrchestrator::new();
        let mut body = json!({
            "resourceType": "Patient",
            "meta": {"profile": ["http://example.org/p1"]}
        });
        let request = MetaRequest::for_create("alice").with_profiles(vec![
            "http://example.org/p1".to_string(),
            "http://example.org/p2".to_string(),
        ]);
        orchestrator.apply(&mut body, &request);
        let profiles = body["meta"]["profile"].as_array().unwrap();
        assert_eq!(profiles.len(), 2);
    }

    #[test]
    fn preserved_timestamp_wins_over_now() {
        let orchestrator = MetaOrchestrator::new();
        let at = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut body = json!({"resourceType": "Patient"});
        let request = MetaRequest::for_create("import").preserving_last_updated(Some(at));
        let applied = orchestrator.apply(&mut body, &request);
        assert_eq!(applied.last_updated, at);
        assert_eq!(body["meta"]["lastUpdated"], "2020-01-01T00:00:00.000Z");
    }
}
