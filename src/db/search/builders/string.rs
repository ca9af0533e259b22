//! String fragment builder
//!
//! Default matching is a normalized prefix match; `:exact` compares the
//! raw value case-sensitively; `:contains` is a normalized substring
//! match. Anything else is an error for string parameters.

use crate::db::search::escape::unescape_search_value;
use crate::db::search::fragment::QueryFragment;
use crate::db::search::normalize::normalize_for_search;
use crate::db::search::registry::SearchParamDescriptor;
use crate::{Error, Result};

pub fn build(
    descriptor: &SearchParamDescriptor,
    modifier: Option<&str>,
    value: &str,
) -> Result<QueryFragment> {
    let raw = unescape_search_value(value);
    if raw.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "empty value for string parameter '{}'",
            descriptor.code
        )));
    }

    let make = |path: &&str| -> Result<QueryFragment> {
        let path = path.to_string();
        match modifier {
            None => Ok(QueryFragment::Prefix {
                path,
                value: normalize_for_search(&raw),
            }),
            Some("exact") => Ok(QueryFragment::Exact {
                path,
                value: raw.clone(),
            }),
            Some("contains") => Ok(QueryFragment::Contains {
                path,
                value: normalize_for_search(&raw),
            }),
            Some(other) => Err(Error::SearchValidation(format!(
                "modifier ':{other}' is not valid for string parameter '{}'",
                descriptor.code
            ))),
        }
    };

    let fragments = descriptor
        .paths
        .iter()
        .map(make)
        .collect::<Result<Vec<_>>>()?;
    Ok(QueryFragment::any_of(fragments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::search::registry::lookup;

    #[test]
    fn default_is_normalized_prefix_over_all_paths() {
        let def = lookup("Patient", "name").unwrap();
        match build(def, None, "Évê").unwrap() {
            QueryFragment::Disjunction(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(
                    parts[0],
                    QueryFragment::Prefix {
                        path: "name.family".into(),
                        value: "eve".into()
                    }
                );
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn exact_keeps_case() {
        let def = lookup("Patient", "family").unwrap();
        assert_eq!(
            build(def, Some("exact"), "Smith").unwrap(),
            QueryFragment::Exact {
                path: "name.family".into(),
                value: "Smith".into()
            }
        );
    }

    #[test]
    fn contains_normalizes() {
        let def = lookup("Patient", "family").unwrap();
        assert_eq!(
            build(def, Some("contains"), "MIT").unwrap(),
            QueryFragment::Contains {
                path: "name.family".into(),
                value: "mit".into()
            }
        );
    }

    #[test]
    fn unknown_modifier_is_an_error() {
        let def = lookup("Patient", "family").unwrap();
        assert!(matches!(
            build(def, Some("sounds-like"), "Smith"),
            Err(Error::SearchValidation(_))
        ));
    }
}
