//! Resource validation against the tenant bucket's policy
//!
//! Structural checks always run (except in disabled mode); profile
//! requirements reject in strict mode and log in lenient mode.

use serde_json::Value as JsonValue;

use crate::config::{BucketConfig, ValidationMode, ValidationProfile};
use crate::db::search::registry;
use crate::models::bulk::BULK_JOB_RESOURCE_TYPE;
use crate::{Error, Result};

const US_CORE_PROFILE_BASE: &str = "http://hl7.org/fhir/us/core/StructureDefinition";

#[derive(Debug, Clone, Default)]
pub struct ValidationService;

impl ValidationService {
    pub fn new() -> Self {
        Self
    }

    /// Canonical profile URIs the bucket's policy stamps onto stored
    /// resources of this type. Empty for the basic profile and for
    /// types the policy does not cover.
    pub fn policy_profiles(&self, bucket: &BucketConfig, resource_type: &str) -> Vec<String> {
        let slug = match bucket.validation_profile {
            ValidationProfile::Basic => None,
            ValidationProfile::UsCore => match resource_type {
                "Patient" => Some("us-core-patient"),
                "Observation" => Some("us-core-observation-lab"),
                "Condition" => Some("us-core-condition"),
                "Encounter" => Some("us-core-encounter"),
                "DiagnosticReport" => Some("us-core-diagnosticreport-lab"),
                "MedicationRequest" => Some("us-core-medicationrequest"),
                _ => None,
            },
        };
        slug.map(|s| vec![format!("{US_CORE_PROFILE_BASE}/{s}")])
            .unwrap_or_default()
    }

    pub fn validate(
        &self,
        bucket: &BucketConfig,
        resource_type: &str,
        body: &JsonValue,
    ) -> Result<()> {
        if bucket.validation_mode == ValidationMode::Disabled {
            return Ok(());
        }

        self.validate_structure(resource_type, body)?;

        let issues = profile_issues(bucket.validation_profile, resource_type, body);
        if issues.is_empty() {
            return Ok(());
        }
        match bucket.validation_mode {
            ValidationMode::Strict => Err(Error::Validation(issues.join("; "))),
            _ => {
                for issue in &issues {
                    tracing::warn!(resource_type, issue = %issue, "profile validation issue");
                }
                Ok(())
            }
        }
    }

    fn validate_structure(&self, resource_type: &str, body: &JsonValue) -> Result<()> {
        let Some(object) = body.as_object() else {
            return Err(Error::InvalidResource(
                "resource body must be a JSON object".to_string(),
            ));
        };

        match object.get("resourceType").and_then(|v| v.as_str()) {
            None => {
                return Err(Error::InvalidResource(
                    "resource is missing resourceType".to_string(),
                ))
            }
            Some(declared) if declared != resource_type => {
                return Err(Error::InvalidResource(format!(
                    "resourceType '{declared}' does not match request path '{resource_type}'"
                )))
            }
            Some(_) => {}
        }

        if !registry::known_resource_type(resource_type) && resource_type != BULK_JOB_RESOURCE_TYPE
        {
            return Err(Error::InvalidResource(format!(
                "resource type '{resource_type}' is not supported"
            )));
        }

        if let Some(id) = object.get("id") {
            if !id.is_string() {
                return Err(Error::InvalidResource("id must be a string".to_string()));
            }
        }
        if let Some(meta) = object.get("meta") {
            if !meta.is_object() {
                return Err(Error::InvalidResource(
                    "meta must be an object".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Required-element checks for the configured profile. Only a small
/// slice of US Core: the elements the profiles mark must-support and
/// cardinality 1..*.
fn profile_issues(
    profile: ValidationProfile,
    resource_type: &str,
    body: &JsonValue,
) -> Vec<String> {
    let required: &[&str] = match profile {
        ValidationProfile::Basic => &[],
        ValidationProfile::UsCore => match resource_type {
            "Patient" => &["identifier", "name", "gender"],
            "Observation" => &["status", "code", "category"],
            "Condition" => &["code", "subject"],
            "Encounter" => &["status", "class"],
            "DiagnosticReport" => &["status", "code", "subject"],
            "MedicationRequest" => &["status", "intent", "subject"],
            _ => &[],
        },
    };

    required
        .iter()
        .filter(|field| {
            let value = body.get(**field);
            value.is_none()
                || value == Some(&JsonValue::Null)
                || value.and_then(|v| v.as_array()).is_some_and(|a| a.is_empty())
        })
        .map(|field| format!("{resource_type}.{field} is required"))
        .collect()
}
