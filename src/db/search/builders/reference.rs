//! Reference fragment builder
//!
//! Accepts `Type/id`, a bare id (qualified with the descriptor's target
//! type), or an absolute URL. Matches the `.reference` field of the
//! element literally.

use crate::db::search::escape::unescape_search_value;
use crate::db::search::fragment::QueryFragment;
use crate::db::search::registry::SearchParamDescriptor;
use crate::{Error, Result};

pub fn build(descriptor: &SearchParamDescriptor, value: &str) -> Result<QueryFragment> {
    let raw = unescape_search_value(value);
    if raw.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "empty value for reference parameter '{}'",
            descriptor.code
        )));
    }

    let reference = if raw.contains('/') || raw.contains("://") {
        raw
    } else {
        match descriptor.reference_target {
            Some(target) => format!("{target}/{raw}"),
            None => raw,
        }
    };

    let fragments = descriptor
        .paths
        .iter()
        .map(|path| QueryFragment::Term {
            path: format!("{path}.reference"),
            value: reference.clone(),
        })
        .collect();
    Ok(QueryFragment::any_of(fragments))
}
