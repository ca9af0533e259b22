//! `_summary` and `_elements` output filtering
//!
//! Filtered resources are marked with the standard SUBSETTED tag so
//! clients know the body is incomplete.

use lazy_static::lazy_static;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

use crate::db::search::params::{SearchParameters, SummaryMode};

const SUBSETTED_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ObservationValue";

/// Elements always kept, whatever the filter says.
const MANDATORY: &[&str] = &["resourceType", "id", "meta"];

lazy_static! {
    /// Summary element sets for `_summary=true`. Types not listed fall
    /// back to returning the full body.
    static ref SUMMARY_ELEMENTS: HashMap<&'static str, &'static [&'static str]> = {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("Patient", &[
            "identifier", "active", "name", "telecom", "gender", "birthDate",
            "address", "managingOrganization", "link",
        ]);
        map.insert("Observation", &[
            "identifier", "status", "category", "code", "subject", "encounter",
            "effectiveDateTime", "issued", "valueQuantity", "valueCodeableConcept",
        ]);
        map.insert("Encounter", &[
            "identifier", "status", "class", "type", "subject", "period",
        ]);
        map.insert("Condition", &[
            "identifier", "clinicalStatus", "verificationStatus", "code",
            "subject", "onsetDateTime", "recordedDate",
        ]);
        map.insert("Practitioner", &["identifier", "active", "name", "telecom", "gender"]);
        map.insert("Organization", &["identifier", "active", "name", "telecom"]);
        map
    };
}

/// Apply `_summary`/`_elements` to an outgoing resource body. Returns
/// the body unchanged when no filtering applies.
pub fn apply_output_filters(params: &SearchParameters, body: &JsonValue) -> JsonValue {
    if let Some(elements) = &params.elements {
        let keep: Vec<&str> = elements.iter().map(String::as_str).collect();
        return subset(body, &keep);
    }

    match params.summary {
        SummaryMode::False | SummaryMode::Count => body.clone(),
        SummaryMode::True => {
            let resource_type = body
                .get("resourceType")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            match SUMMARY_ELEMENTS.get(resource_type) {
                Some(elements) => subset(body, elements),
                None => body.clone(),
            }
        }
        SummaryMode::Text => subset(body, &["text"]),
        SummaryMode::Data => {
            let mut filtered = body.clone();
            if let Some(object) = filtered.as_object_mut() {
                object.remove("text");
            }
            mark_subsetted(&mut filtered);
            filtered
        }
    }
}

fn subset(body: &JsonValue, keep: &[&str]) -> JsonValue {
    let Some(object) = body.as_object() else {
        return body.clone();
    };
    let mut filtered = Map::new();
    for (key, value) in object {
        if MANDATORY.contains(&key.as_str()) || keep.contains(&key.as_str()) {
            filtered.insert(key.clone(), value.clone());
        }
    }
    let mut result = JsonValue::Object(filtered);
    mark_subsetted(&mut result);
    result
}

fn mark_subsetted(body: &mut JsonValue) {
    if !body.get("meta").is_some_and(|m| m.is_object()) {
        body["meta"] = json!({});
    }
    let meta = body["meta"].as_object_mut().unwrap();
    let mut tags: Vec<JsonValue> = meta
        .get("tag")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();
    let already = tags.iter().any(|t| {
        t.get("system").and_then(|s| s.as_str()) == Some(SUBSETTED_SYSTEM)
            && t.get("code").and_then(|c| c.as_str()) == Some("SUBSETTED")
    });
    if !already {
        tags.push(json!({"system": SUBSETTED_SYSTEM, "code": "SUBSETTED"}));
    }
    meta.insert("tag".to_string(), JsonValue::Array(tags));
}
