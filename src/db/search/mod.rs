//! Search compilation pipeline: parse → validate → build fragments →
//! assemble a backend-neutral `StoreQuery`.

pub mod assembler;
pub mod builders;
pub mod escape;
pub mod fragment;
pub mod normalize;
pub mod params;
pub mod preprocessor;
pub mod registry;

use crate::Result;
use fragment::StoreQuery;
use params::SearchParameters;

/// Compile a parsed search request into a store query, failing fast on
/// any invalid parameter.
pub fn compile(resource_type: &str, params: &SearchParameters) -> Result<StoreQuery> {
    let resolved = preprocessor::resolve(resource_type, params)?;
    assembler::assemble(resource_type, &resolved, params)
}
