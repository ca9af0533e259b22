//! Search parameter parsing
//!
//! Splits a query string into control parameters (`_count`, `_sort`, ...)
//! and resource search parameters, preserving request order and the
//! AND/OR occurrence model: repeated parameters AND, comma-separated
//! values within one occurrence OR.

use crate::db::search::escape::split_unescaped;
use crate::{Error, Result};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// One occurrence of a resource search parameter as it appeared on the
/// request, before registry resolution.
#[derive(Debug, Clone)]
pub struct RawSearchParam {
    /// Name as written, including modifier ("name:exact").
    pub raw_name: String,
    /// Parameter code with the modifier stripped.
    pub code: String,
    pub modifier: Option<String>,
    /// Raw value as written (escapes intact).
    pub raw_value: String,
    /// Comma-split OR values, still escaped.
    pub or_values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortParam {
    pub code: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotalMode {
    #[default]
    None,
    Estimate,
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryMode {
    #[default]
    False,
    True,
    Text,
    Data,
    Count,
}

/// Parsed search request: control parameters plus raw resource params.
#[derive(Debug, Clone, Default)]
pub struct SearchParameters {
    pub resource_params: Vec<RawSearchParam>,
    pub count: Option<usize>,
    pub offset: usize,
    pub sort: Vec<SortParam>,
    pub total: TotalMode,
    pub summary: SummaryMode,
    pub elements: Option<Vec<String>>,
}

impl SearchParameters {
    /// Parse from decoded query items in request order.
    pub fn from_items(items: &[(String, String)]) -> Result<Self> {
        let mut params = SearchParameters::default();

        for (name, value) in items {
            match name.as_str() {
                "_count" => {
                    let n: usize = value.parse().map_err(|_| {
                        Error::InvalidParameter(format!("_count must be a non-negative integer, got '{value}'"))
                    })?;
                    params.count = Some(n.min(MAX_PAGE_SIZE));
                }
                "_offset" => {
                    params.offset = value.parse().map_err(|_| {
                        Error::InvalidParameter(format!("_offset must be a non-negative integer, got '{value}'"))
                    })?;
                }
                "_sort" => {
                    for field in value.split(',').filter(|s| !s.is_empty()) {
                        let (code, direction) = match field.strip_prefix('-') {
                            Some(rest) => (rest, SortDirection::Descending),
                            None => (field, SortDirection::Ascending),
                        };
                        params.sort.push(SortParam {
                            code: code.to_string(),
                            direction,
                        });
                    }
                }
                "_total" => {
                    params.total = match value.as_str() {
                        "none" => TotalMode::None,
                        "estimate" => TotalMode::Estimate,
                        "accurate" => TotalMode::Accurate,
                        other => {
                            return Err(Error::InvalidParameter(format!(
                                "_total must be none|estimate|accurate, got '{other}'"
                            )))
                        }
                    };
                }
                "_summary" => {
                    params.summary = match value.as_str() {
                        "true" => SummaryMode::True,
                        "text" => SummaryMode::Text,
                        "data" => SummaryMode::Data,
                        "count" => SummaryMode::Count,
                        "false" => SummaryMode::False,
                        other => {
                            return Err(Error::InvalidParameter(format!(
                                "_summary must be true|text|data|count|false, got '{other}'"
                            )))
                        }
                    };
                }
                "_elements" => {
                    let elements: Vec<String> = value
                        .split(',')
                        .map(|e| e.trim().to_string())
                        .filter(|e| !e.is_empty())
                        .collect();
                    if !elements.is_empty() {
                        params.elements = Some(elements);
                    }
                }
                // Accepted but inert: output formatting and unsupported
                // includes are not errors.
                "_format" | "_pretty" => {}
                "_revinclude" | "_include" => {
                    tracing::warn!(param = %name, value = %value, "ignoring unsupported include parameter");
                }
                _ => {
                    let (code, modifier) = parse_parameter_name(name);
                    params.resource_params.push(RawSearchParam {
                        raw_name: name.clone(),
                        code,
                        modifier,
                        raw_value: value.clone(),
                        or_values: split_unescaped(value, ','),
                    });
                }
            }
        }

        // _summary=count and _count=0 are the same request
        if params.count == Some(0) {
            params.summary = SummaryMode::Count;
        }

        Ok(params)
    }

    /// Effective page size after defaulting and clamping.
    pub fn page_size(&self) -> usize {
        self.count.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn count_only(&self) -> bool {
        self.summary == SummaryMode::Count
    }
}

/// Split "name:modifier" into code and lowercased modifier.
fn parse_parameter_name(name: &str) -> (String, Option<String>) {
    match name.split_once(':') {
        Some((code, modifier)) if !modifier.is_empty() => {
            (code.to_string(), Some(modifier.to_ascii_lowercase()))
        }
        _ => (name.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_control_params() {
        let p = SearchParameters::from_items(&items(&[
            ("_count", "50"),
            ("_offset", "10"),
            ("_total", "accurate"),
        ]))
        .unwrap();
        assert_eq!(p.count, Some(50));
        assert_eq!(p.offset, 10);
        assert_eq!(p.total, TotalMode::Accurate);
        assert!(p.resource_params.is_empty());
    }

    #[test]
    fn clamps_count_to_max() {
        let p = SearchParameters::from_items(&items(&[("_count", "5000")])).unwrap();
        assert_eq!(p.count, Some(MAX_PAGE_SIZE));
    }

    #[test]
    fn count_zero_means_count_only() {
        let p = SearchParameters::from_items(&items(&[("_count", "0")])).unwrap();
        assert!(p.count_only());
    }

    #[test]
    fn rejects_non_numeric_count() {
        let err = SearchParameters::from_items(&items(&[("_count", "lots")])).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn parses_sort_with_direction() {
        let p = SearchParameters::from_items(&items(&[("_sort", "-_lastUpdated,name")])).unwrap();
        assert_eq!(p.sort.len(), 2);
        assert_eq!(p.sort[0].code, "_lastUpdated");
        assert_eq!(p.sort[0].direction, SortDirection::Descending);
        assert_eq!(p.sort[1].code, "name");
        assert_eq!(p.sort[1].direction, SortDirection::Ascending);
    }

    #[test]
    fn repeated_params_and_or_values() {
        let p = SearchParameters::from_items(&items(&[
            ("name", "smith"),
            ("name", "john"),
            ("gender", "male,female"),
        ]))
        .unwrap();
        assert_eq!(p.resource_params.len(), 3);
        assert_eq!(p.resource_params[2].or_values, vec!["male", "female"]);
    }

    #[test]
    fn splits_modifier_from_name() {
        let p = SearchParameters::from_items(&items(&[("name:exact", "Smith")])).unwrap();
        assert_eq!(p.resource_params[0].code, "name");
        assert_eq!(p.resource_params[0].modifier.as_deref(), Some("exact"));
    }

    #[test]
    fn escaped_comma_is_one_or_value() {
        let p = SearchParameters::from_items(&items(&[("name", "Smith\\, Jr")])).unwrap();
        assert_eq!(p.resource_params[0].or_values.len(), 1);
    }

    #[test]
    fn elements_are_trimmed() {
        let p =
            SearchParameters::from_items(&items(&[("_elements", "name, birthDate")])).unwrap();
        assert_eq!(
            p.elements.as_deref().unwrap(),
            &["name".to_string(), "birthDate".to_string()]
        );
    }
}
