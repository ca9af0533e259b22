//! Search parameter preprocessing
//!
//! Validates every resource parameter against the registry before any
//! query is compiled: existence, value format, and cross-parameter
//! consistency. The whole request is rejected on the first problem so
//! malformed searches never reach the store.

use std::collections::HashMap;

use crate::db::search::builders::{date, number};
use crate::db::search::escape::unescape_search_value;
use crate::db::search::params::{RawSearchParam, SearchParameters};
use crate::db::search::registry::{self, SearchParamDescriptor, SearchParamType};
use crate::{Error, Result};

/// A request parameter bound to its registry descriptor, ready for the
/// fragment builders.
#[derive(Debug, Clone)]
pub struct ResolvedParam {
    pub descriptor: &'static SearchParamDescriptor,
    pub modifier: Option<String>,
    /// OR values, still escaped; builders unescape.
    pub or_values: Vec<String>,
}

/// Validate and resolve all resource parameters of a search request.
pub fn resolve(resource_type: &str, params: &SearchParameters) -> Result<Vec<ResolvedParam>> {
    if !registry::known_resource_type(resource_type) {
        return Err(Error::SearchValidation(format!(
            "unknown resource type '{resource_type}'"
        )));
    }

    let mut resolved = Vec::with_capacity(params.resource_params.len());
    for raw in &params.resource_params {
        resolved.push(resolve_one(resource_type, raw)?);
    }

    check_date_consistency(&resolved)?;
    Ok(resolved)
}

fn resolve_one(resource_type: &str, raw: &RawSearchParam) -> Result<ResolvedParam> {
    if raw.code.contains('.') {
        return Err(Error::SearchValidation(format!(
            "chained parameter '{}' is not supported",
            raw.raw_name
        )));
    }

    let descriptor = registry::lookup(resource_type, &raw.code).ok_or_else(|| {
        Error::SearchValidation(format!(
            "unknown search parameter '{}' for resource type {resource_type}",
            raw.code
        ))
    })?;

    check_modifier(descriptor, raw)?;

    for value in &raw.or_values {
        check_value_format(descriptor, value)?;
    }

    Ok(ResolvedParam {
        descriptor,
        modifier: raw.modifier.clone(),
        or_values: raw.or_values.clone(),
    })
}

fn check_modifier(descriptor: &SearchParamDescriptor, raw: &RawSearchParam) -> Result<()> {
    let Some(modifier) = raw.modifier.as_deref() else {
        return Ok(());
    };
    match descriptor.param_type {
        // String modifiers are validated strictly here; the builder
        // enforces the same set.
        SearchParamType::String => match modifier {
            "exact" | "contains" => Ok(()),
            other => Err(Error::SearchValidation(format!(
                "modifier ':{other}' is not valid for string parameter '{}'",
                descriptor.code
            ))),
        },
        // Tokens accept any modifier; unknown ones degrade to a text
        // match in the builder.
        SearchParamType::Token => Ok(()),
        _ => Err(Error::SearchValidation(format!(
            "modifier ':{modifier}' is not valid for parameter '{}'",
            descriptor.code
        ))),
    }
}

fn check_value_format(descriptor: &SearchParamDescriptor, value: &str) -> Result<()> {
    match descriptor.param_type {
        SearchParamType::Date => {
            let (_, date_part) = super::builders::SearchPrefix::parse(value);
            date::parse_date_value(date_part).map(|_| ())
        }
        SearchParamType::Number => {
            let (_, number_part) = super::builders::SearchPrefix::parse(value);
            number::parse_number(number_part).map(|_| ())
        }
        _ => {
            if unescape_search_value(value).is_empty() {
                Err(Error::InvalidParameter(format!(
                    "empty value for parameter '{}'",
                    descriptor.code
                )))
            } else {
                Ok(())
            }
        }
    }
}

/// An implicit-equality occurrence of a date parameter pins the value
/// to one range, so it cannot be AND-combined with any other occurrence
/// of the same parameter: reject the request instead of silently
/// returning nothing.
fn check_date_consistency(resolved: &[ResolvedParam]) -> Result<()> {
    // code -> (implicit-eq occurrences, total occurrences)
    let mut occurrences: HashMap<&str, (usize, usize)> = HashMap::new();
    for param in resolved {
        if param.descriptor.param_type != SearchParamType::Date {
            continue;
        }
        let entry = occurrences.entry(param.descriptor.code).or_insert((0, 0));
        entry.1 += 1;
        let all_implicit = param
            .or_values
            .iter()
            .all(|v| !date::has_explicit_prefix(v));
        if all_implicit {
            entry.0 += 1;
        }
    }
    for (code, (implicit, total)) in occurrences {
        if implicit > 1 {
            return Err(Error::SearchValidation(format!(
                "multiple date values without comparison prefixes for parameter '{code}'"
            )));
        }
        if implicit == 1 && total > 1 {
            return Err(Error::SearchValidation(format!(
                "date parameter '{code}' combines an unprefixed value with other values"
            )));
        }
    }
    Ok(())
}
