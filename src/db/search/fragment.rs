//! Typed query fragments
//!
//! Fragment builders emit these instead of query strings; each storage
//! backend lowers them to its own query language (SQL for Postgres,
//! direct evaluation for the in-memory store). Paths use dot notation
//! into the resource body; array segments match any element.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryFragment {
    /// Exact value match, case-sensitive (token semantics).
    Term { path: String, value: String },
    /// Case-sensitive exact string match (`:exact` modifier).
    Exact { path: String, value: String },
    /// Normalized prefix match (default string search).
    Prefix { path: String, value: String },
    /// Normalized substring match (`:contains` modifier).
    Contains { path: String, value: String },
    /// Instant range over a date/dateTime element. `None` bounds are
    /// unbounded; exclusive end unless `end_inclusive`.
    DateRange {
        path: String,
        start: Option<DateTime<Utc>>,
        start_inclusive: bool,
        end: Option<DateTime<Utc>>,
        end_inclusive: bool,
    },
    /// Numeric range over a decimal element.
    NumberRange {
        path: String,
        low: Option<Decimal>,
        low_inclusive: bool,
        high: Option<Decimal>,
        high_inclusive: bool,
    },
    /// No element at the path carries a non-empty value. Emitted for
    /// `|code` token values, which require the system to be absent.
    Missing { path: String },
    /// Matches tombstone versions. Always placed in `must_not` so
    /// deleted resources never appear in results.
    Tombstone,
    /// All sub-fragments must match (AND).
    Conjunction(Vec<QueryFragment>),
    /// At least one sub-fragment must match (OR).
    Disjunction(Vec<QueryFragment>),
}

impl QueryFragment {
    /// Collapse a list into a single fragment: one element passes
    /// through, several become a disjunction.
    pub fn any_of(mut fragments: Vec<QueryFragment>) -> QueryFragment {
        if fragments.len() == 1 {
            fragments.remove(0)
        } else {
            QueryFragment::Disjunction(fragments)
        }
    }

    pub fn all_of(mut fragments: Vec<QueryFragment>) -> QueryFragment {
        if fragments.len() == 1 {
            fragments.remove(0)
        } else {
            QueryFragment::Conjunction(fragments)
        }
    }
}

/// Sort target resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortTarget {
    /// Envelope column, used for `_lastUpdated`.
    LastUpdated,
    /// Envelope column, used for `_id`.
    Id,
    /// Document path in dot notation.
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub target: SortTarget,
    pub ascending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Fetch matching resources (optionally with a separate count).
    Fetch,
    /// Count only; backends skip fetching bodies entirely.
    CountOnly,
}

/// Backend-neutral compiled query. This is the whole contract between
/// the search compiler and the storage layer.
#[derive(Debug, Clone)]
pub struct StoreQuery {
    pub resource_type: String,
    /// Every fragment must match.
    pub must: Vec<QueryFragment>,
    /// No fragment may match. Always contains `Tombstone`.
    pub must_not: Vec<QueryFragment>,
    pub offset: usize,
    pub count: usize,
    pub sort: Vec<SortKey>,
    pub mode: QueryMode,
}

impl StoreQuery {
    /// A query matching every live resource of a type, default paging.
    pub fn all(resource_type: impl Into<String>) -> Self {
        StoreQuery {
            resource_type: resource_type.into(),
            must: Vec::new(),
            must_not: vec![QueryFragment::Tombstone],
            offset: 0,
            count: super::params::DEFAULT_PAGE_SIZE,
            sort: Vec::new(),
            mode: QueryMode::Fetch,
        }
    }
}
