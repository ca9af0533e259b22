//! Static search parameter registry
//!
//! Maps (resourceType, code) to a descriptor carrying the parameter type
//! and the document paths it searches. The table is built at startup; no
//! runtime introspection of resource structures happens anywhere else.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchParamType {
    String,
    Token,
    Date,
    Reference,
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSearchParamTypeError;

impl FromStr for SearchParamType {
    type Err = ParseSearchParamTypeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "token" => Ok(Self::Token),
            "date" => Ok(Self::Date),
            "reference" => Ok(Self::Reference),
            "number" => Ok(Self::Number),
            _ => Err(ParseSearchParamTypeError),
        }
    }
}

/// Shape of the element a token parameter searches, which decides how
/// `system|code` values map onto document fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A primitive (code, boolean, id): match the value directly.
    Primitive,
    /// Coding or CodeableConcept.coding: match `.code` / `.system`.
    Coding,
    /// Identifier or ContactPoint: match `.value` / `.system`.
    SystemValue,
}

#[derive(Debug, Clone)]
pub struct SearchParamDescriptor {
    pub code: &'static str,
    pub resource_type: &'static str,
    pub param_type: SearchParamType,
    /// Document paths this parameter searches, in dot notation. Array
    /// segments are implicit: "name.given" covers every `name` entry.
    pub paths: &'static [&'static str],
    pub token_kind: TokenKind,
    /// Default target type for bare-id reference values (`subject=123`
    /// means `Patient/123` when the target is `Patient`).
    pub reference_target: Option<&'static str>,
}

const fn string_param(
    resource_type: &'static str,
    code: &'static str,
    paths: &'static [&'static str],
) -> SearchParamDescriptor {
    SearchParamDescriptor {
        code,
        resource_type,
        param_type: SearchParamType::String,
        paths,
        token_kind: TokenKind::Primitive,
        reference_target: None,
    }
}

const fn token_param(
    resource_type: &'static str,
    code: &'static str,
    paths: &'static [&'static str],
    token_kind: TokenKind,
) -> SearchParamDescriptor {
    SearchParamDescriptor {
        code,
        resource_type,
        param_type: SearchParamType::Token,
        paths,
        token_kind,
        reference_target: None,
    }
}

const fn date_param(
    resource_type: &'static str,
    code: &'static str,
    paths: &'static [&'static str],
) -> SearchParamDescriptor {
    SearchParamDescriptor {
        code,
        resource_type,
        param_type: SearchParamType::Date,
        paths,
        token_kind: TokenKind::Primitive,
        reference_target: None,
    }
}

const fn reference_param(
    resource_type: &'static str,
    code: &'static str,
    paths: &'static [&'static str],
    target: &'static str,
) -> SearchParamDescriptor {
    SearchParamDescriptor {
        code,
        resource_type,
        param_type: SearchParamType::Reference,
        paths,
        token_kind: TokenKind::Primitive,
        reference_target: Some(target),
    }
}

const fn number_param(
    resource_type: &'static str,
    code: &'static str,
    paths: &'static [&'static str],
) -> SearchParamDescriptor {
    SearchParamDescriptor {
        code,
        resource_type,
        param_type: SearchParamType::Number,
        paths,
        token_kind: TokenKind::Primitive,
        reference_target: None,
    }
}

/// Parameters defined for every resource type.
const UNIVERSAL_PARAMS: &[SearchParamDescriptor] = &[
    token_param("Resource", "_id", &["id"], TokenKind::Primitive),
    date_param("Resource", "_lastUpdated", &["meta.lastUpdated"]),
    token_param("Resource", "_profile", &["meta.profile"], TokenKind::Primitive),
    token_param("Resource", "_tag", &["meta.tag"], TokenKind::Coding),
];

const RESOURCE_PARAMS: &[SearchParamDescriptor] = &[
    // Patient
    string_param("Patient", "name", &["name.family", "name.given", "name.text"]),
    string_param("Patient", "family", &["name.family"]),
    string_param("Patient", "given", &["name.given"]),
    string_param("Patient", "address", &["address.city", "address.state", "address.line", "address.postalCode"]),
    string_param("Patient", "address-city", &["address.city"]),
    token_param("Patient", "gender", &["gender"], TokenKind::Primitive),
    token_param("Patient", "active", &["active"], TokenKind::Primitive),
    token_param("Patient", "identifier", &["identifier"], TokenKind::SystemValue),
    token_param("Patient", "telecom", &["telecom"], TokenKind::SystemValue),
    date_param("Patient", "birthdate", &["birthDate"]),
    date_param("Patient", "death-date", &["deceasedDateTime"]),
    reference_param("Patient", "general-practitioner", &["generalPractitioner"], "Practitioner"),
    reference_param("Patient", "organization", &["managingOrganization"], "Organization"),
    // Observation
    token_param("Observation", "code", &["code.coding"], TokenKind::Coding),
    token_param("Observation", "category", &["category.coding"], TokenKind::Coding),
    token_param("Observation", "status", &["status"], TokenKind::Primitive),
    token_param("Observation", "identifier", &["identifier"], TokenKind::SystemValue),
    date_param("Observation", "date", &["effectiveDateTime"]),
    reference_param("Observation", "subject", &["subject"], "Patient"),
    reference_param("Observation", "patient", &["subject"], "Patient"),
    reference_param("Observation", "performer", &["performer"], "Practitioner"),
    reference_param("Observation", "encounter", &["encounter"], "Encounter"),
    number_param("Observation", "value-quantity", &["valueQuantity.value"]),
    // Practitioner
    string_param("Practitioner", "name", &["name.family", "name.given", "name.text"]),
    string_param("Practitioner", "family", &["name.family"]),
    string_param("Practitioner", "given", &["name.given"]),
    token_param("Practitioner", "gender", &["gender"], TokenKind::Primitive),
    token_param("Practitioner", "identifier", &["identifier"], TokenKind::SystemValue),
    // Encounter
    token_param("Encounter", "status", &["status"], TokenKind::Primitive),
    token_param("Encounter", "class", &["class"], TokenKind::Coding),
    token_param("Encounter", "type", &["type.coding"], TokenKind::Coding),
    token_param("Encounter", "identifier", &["identifier"], TokenKind::SystemValue),
    date_param("Encounter", "date", &["period.start"]),
    reference_param("Encounter", "subject", &["subject"], "Patient"),
    reference_param("Encounter", "patient", &["subject"], "Patient"),
    // Condition
    token_param("Condition", "code", &["code.coding"], TokenKind::Coding),
    token_param("Condition", "clinical-status", &["clinicalStatus.coding"], TokenKind::Coding),
    token_param("Condition", "category", &["category.coding"], TokenKind::Coding),
    date_param("Condition", "onset-date", &["onsetDateTime"]),
    date_param("Condition", "recorded-date", &["recordedDate"]),
    reference_param("Condition", "subject", &["subject"], "Patient"),
    reference_param("Condition", "patient", &["subject"], "Patient"),
    // Organization
    string_param("Organization", "name", &["name"]),
    token_param("Organization", "identifier", &["identifier"], TokenKind::SystemValue),
    token_param("Organization", "active", &["active"], TokenKind::Primitive),
    // DiagnosticReport
    token_param("DiagnosticReport", "code", &["code.coding"], TokenKind::Coding),
    token_param("DiagnosticReport", "status", &["status"], TokenKind::Primitive),
    date_param("DiagnosticReport", "date", &["effectiveDateTime"]),
    reference_param("DiagnosticReport", "subject", &["subject"], "Patient"),
    reference_param("DiagnosticReport", "patient", &["subject"], "Patient"),
    reference_param("DiagnosticReport", "performer", &["performer"], "Practitioner"),
    // MedicationRequest
    token_param("MedicationRequest", "status", &["status"], TokenKind::Primitive),
    token_param("MedicationRequest", "intent", &["intent"], TokenKind::Primitive),
    token_param("MedicationRequest", "code", &["medicationCodeableConcept.coding"], TokenKind::Coding),
    date_param("MedicationRequest", "authoredon", &["authoredOn"]),
    reference_param("MedicationRequest", "subject", &["subject"], "Patient"),
    reference_param("MedicationRequest", "patient", &["subject"], "Patient"),
];

lazy_static! {
    static ref REGISTRY: HashMap<(&'static str, &'static str), &'static SearchParamDescriptor> = {
        let mut map = HashMap::new();
        for def in RESOURCE_PARAMS.iter().chain(UNIVERSAL_PARAMS.iter()) {
            map.insert((def.resource_type, def.code), def);
        }
        map
    };
}

/// Look up a parameter for a resource type, falling back to the
/// universal `Resource` parameters (`_id`, `_lastUpdated`, ...).
pub fn lookup(resource_type: &str, code: &str) -> Option<&'static SearchParamDescriptor> {
    REGISTRY
        .get(&(resource_type, code))
        .or_else(|| REGISTRY.get(&("Resource", code)))
        .copied()
}

/// Whether a resource type has any registered parameters (i.e. the
/// server knows the type at all). Universal params don't count.
pub fn known_resource_type(resource_type: &str) -> bool {
    RESOURCE_PARAMS
        .iter()
        .any(|d| d.resource_type == resource_type)
}
