//! Query assembly
//!
//! Combines the fragments built for each resolved parameter into one
//! `StoreQuery`: AND across parameters, OR within a parameter's values,
//! and an unconditional tombstone exclusion in `must_not`.

use crate::db::search::builders::{date, number, reference, string, token};
use crate::db::search::fragment::{QueryFragment, QueryMode, SortKey, SortTarget, StoreQuery};
use crate::db::search::params::{SearchParameters, SortDirection};
use crate::db::search::preprocessor::ResolvedParam;
use crate::db::search::registry::{self, SearchParamType};
use crate::{Error, Result};

pub fn assemble(
    resource_type: &str,
    resolved: &[ResolvedParam],
    params: &SearchParameters,
) -> Result<StoreQuery> {
    let mut must = Vec::with_capacity(resolved.len());
    for param in resolved {
        must.push(param_fragment(param)?);
    }

    Ok(StoreQuery {
        resource_type: resource_type.to_string(),
        must,
        must_not: vec![QueryFragment::Tombstone],
        offset: params.offset,
        count: params.page_size(),
        sort: resolve_sort(resource_type, params)?,
        mode: if params.count_only() {
            QueryMode::CountOnly
        } else {
            QueryMode::Fetch
        },
    })
}

/// One fragment per OR value, collapsed into a disjunction.
fn param_fragment(param: &ResolvedParam) -> Result<QueryFragment> {
    let modifier = param.modifier.as_deref();
    let mut alternatives = Vec::with_capacity(param.or_values.len());
    for value in &param.or_values {
        let fragment = match param.descriptor.param_type {
            SearchParamType::String => string::build(param.descriptor, modifier, value)?,
            SearchParamType::Token => token::build(param.descriptor, modifier, value)?,
            SearchParamType::Date => date::build(param.descriptor, value)?,
            SearchParamType::Reference => reference::build(param.descriptor, value)?,
            SearchParamType::Number => number::build(param.descriptor, value)?,
        };
        alternatives.push(fragment);
    }
    Ok(QueryFragment::any_of(alternatives))
}

fn resolve_sort(resource_type: &str, params: &SearchParameters) -> Result<Vec<SortKey>> {
    params
        .sort
        .iter()
        .map(|sort| {
            let target = match sort.code.as_str() {
                "_lastUpdated" => SortTarget::LastUpdated,
                "_id" => SortTarget::Id,
                code => {
                    let descriptor = registry::lookup(resource_type, code).ok_or_else(|| {
                        Error::SearchValidation(format!(
                            "unknown sort parameter '{code}' for resource type {resource_type}"
                        ))
                    })?;
                    SortTarget::Path(descriptor.paths[0].to_string())
                }
            };
            Ok(SortKey {
                target,
                ascending: sort.direction == SortDirection::Ascending,
            })
        })
        .collect()
}
