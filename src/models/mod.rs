pub mod bulk;
pub mod fhir;
