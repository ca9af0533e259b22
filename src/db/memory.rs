//! In-memory storage backend
//!
//! Evaluates query fragments directly over the stored JSON documents.
//! Used by the test suites and useful for local development without a
//! database. Transactions snapshot the whole map and restore it on
//! rollback, which is correct for one writer at a time; concurrent
//! transactions on this backend are not serialized against each other.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::db::search::builders::date::parse_date_value;
use crate::db::search::fragment::{QueryFragment, SortKey, SortTarget, StoreQuery};
use crate::db::search::normalize::normalize_for_search;
use crate::db::traits::{ResourceStore, ResourceTransaction, TransactionContext};
use crate::models::fhir::Resource;
use crate::{Error, Result};

type Key = (String, String, String);
type Versions = HashMap<Key, Vec<Resource>>;

#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    inner: Arc<Mutex<Versions>>,
    queries_executed: Arc<AtomicU64>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of search/count queries executed, exposed so tests can
    /// assert that invalid requests never reach the store.
    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::SeqCst)
    }

    fn key(tenant: &str, resource_type: &str, id: &str) -> Key {
        (tenant.to_string(), resource_type.to_string(), id.to_string())
    }

    fn matching_heads(&self, tenant: &str, query: &StoreQuery) -> Vec<Resource> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<Resource> = inner
            .iter()
            .filter(|((t, rt, _), _)| t == tenant && *rt == query.resource_type)
            .filter_map(|(_, versions)| versions.last())
            .filter(|head| {
                query.must.iter().all(|f| eval(f, head))
                    && !query.must_not.iter().any(|f| eval(f, head))
            })
            .cloned()
            .collect();
        sort_resources(&mut matches, &query.sort);
        matches
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn read(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>> {
        Ok(self
            .read_head(tenant, resource_type, id)
            .await?
            .filter(|r| !r.deleted))
    }

    async fn read_head(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(&Self::key(tenant, resource_type, id))
            .and_then(|versions| versions.last())
            .cloned())
    }

    async fn read_version(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
        version_id: i32,
    ) -> Result<Option<Resource>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(&Self::key(tenant, resource_type, id))
            .and_then(|versions| versions.iter().find(|r| r.version_id == version_id))
            .cloned())
    }

    async fn history(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<Resource>> {
        let inner = self.inner.lock().unwrap();
        let mut versions = inner
            .get(&Self::key(tenant, resource_type, id))
            .cloned()
            .unwrap_or_default();
        versions.reverse();
        Ok(versions)
    }

    async fn insert_version(&self, tenant: &str, resource: &Resource) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let versions = inner
            .entry(Self::key(tenant, &resource.resource_type, &resource.id))
            .or_default();
        if let Some(head) = versions.last() {
            if resource.version_id <= head.version_id {
                return Err(Error::VersionConflict(format!(
                    "version {} already stored for {}/{}",
                    resource.version_id, resource.resource_type, resource.id
                )));
            }
        }
        versions.push(resource.clone());
        Ok(())
    }

    async fn execute_search(&self, tenant: &str, query: &StoreQuery) -> Result<Vec<Resource>> {
        self.queries_executed.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .matching_heads(tenant, query)
            .into_iter()
            .skip(query.offset)
            .take(query.count)
            .collect())
    }

    async fn execute_count(&self, tenant: &str, query: &StoreQuery) -> Result<i64> {
        self.queries_executed.fetch_add(1, Ordering::SeqCst);
        Ok(self.matching_heads(tenant, query).len() as i64)
    }
}

pub struct InMemoryTransaction {
    store: InMemoryResourceStore,
    snapshot: Versions,
    finished: bool,
}

#[async_trait]
impl ResourceTransaction for InMemoryResourceStore {
    type Context = InMemoryTransaction;

    async fn begin_transaction(&self) -> Result<Self::Context> {
        let snapshot = self.inner.lock().unwrap().clone();
        Ok(InMemoryTransaction {
            store: self.clone(),
            snapshot,
            finished: false,
        })
    }
}

#[async_trait]
impl TransactionContext for InMemoryTransaction {
    async fn read_head(
        &mut self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>> {
        self.store.read_head(tenant, resource_type, id).await
    }

    async fn insert_version(&mut self, tenant: &str, resource: &Resource) -> Result<()> {
        self.store.insert_version(tenant, resource).await
    }

    async fn commit(mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        let mut inner = self.store.inner.lock().unwrap();
        *inner = std::mem::take(&mut self.snapshot);
        self.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        // An abandoned transaction rolls back, like a dropped sqlx tx
        if !self.finished {
            let mut inner = self.store.inner.lock().unwrap();
            *inner = std::mem::take(&mut self.snapshot);
        }
    }
}

// ---- fragment evaluation ----

fn eval(fragment: &QueryFragment, resource: &Resource) -> bool {
    match fragment {
        QueryFragment::Term { path, value } => any_value(resource, path, |v| {
            scalar_text(v).is_some_and(|t| t == *value)
        }),
        QueryFragment::Exact { path, value } => any_value(resource, path, |v| {
            scalar_text(v).is_some_and(|t| t == *value)
        }),
        QueryFragment::Prefix { path, value } => any_value(resource, path, |v| {
            scalar_text(v).is_some_and(|t| normalize_for_search(&t).starts_with(value))
        }),
        QueryFragment::Contains { path, value } => any_value(resource, path, |v| {
            scalar_text(v).is_some_and(|t| normalize_for_search(&t).contains(value.as_str()))
        }),
        QueryFragment::DateRange {
            path,
            start,
            start_inclusive,
            end,
            end_inclusive,
        } => any_value(resource, path, |v| {
            let Some(instant) = scalar_instant(v) else {
                return false;
            };
            within_date(instant, *start, *start_inclusive, *end, *end_inclusive)
        }),
        QueryFragment::NumberRange {
            path,
            low,
            low_inclusive,
            high,
            high_inclusive,
        } => any_value(resource, path, |v| {
            let Some(number) = scalar_decimal(v) else {
                return false;
            };
            within_number(number, *low, *low_inclusive, *high, *high_inclusive)
        }),
        QueryFragment::Missing { path } => !any_value(resource, path, |v| {
            scalar_text(v).is_some_and(|t| !t.is_empty())
        }),
        QueryFragment::Tombstone => resource.deleted,
        QueryFragment::Conjunction(parts) => parts.iter().all(|f| eval(f, resource)),
        QueryFragment::Disjunction(parts) => parts.iter().any(|f| eval(f, resource)),
    }
}

fn within_date(
    instant: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    start_inclusive: bool,
    end: Option<DateTime<Utc>>,
    end_inclusive: bool,
) -> bool {
    if let Some(start) = start {
        let ok = if start_inclusive {
            instant >= start
        } else {
            instant > start
        };
        if !ok {
            return false;
        }
    }
    if let Some(end) = end {
        let ok = if end_inclusive {
            instant <= end
        } else {
            instant < end
        };
        if !ok {
            return false;
        }
    }
    true
}

fn within_number(
    number: Decimal,
    low: Option<Decimal>,
    low_inclusive: bool,
    high: Option<Decimal>,
    high_inclusive: bool,
) -> bool {
    if let Some(low) = low {
        let ok = if low_inclusive {
            number >= low
        } else {
            number > low
        };
        if !ok {
            return false;
        }
    }
    if let Some(high) = high {
        let ok = if high_inclusive {
            number <= high
        } else {
            number < high
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Walk a dot path over the document, flattening arrays at every step,
/// and test the predicate against each leaf value.
fn any_value<F: Fn(&JsonValue) -> bool>(resource: &Resource, path: &str, pred: F) -> bool {
    collect_values(&resource.resource, path).iter().any(|v| pred(v))
}

fn collect_values<'a>(root: &'a JsonValue, path: &str) -> Vec<&'a JsonValue> {
    let mut current = vec![root];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                JsonValue::Array(items) => {
                    for item in items {
                        if let Some(child) = item.get(segment) {
                            next.push(child);
                        }
                    }
                }
                other => {
                    if let Some(child) = other.get(segment) {
                        next.push(child);
                    }
                }
            }
        }
        current = next;
    }
    // Flatten a trailing array leaf so predicates see scalars
    let mut leaves = Vec::with_capacity(current.len());
    for value in current {
        match value {
            JsonValue::Array(items) => leaves.extend(items.iter()),
            other => leaves.push(other),
        }
    }
    leaves
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn scalar_instant(value: &JsonValue) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    parse_date_value(text).ok().map(|r| r.start)
}

fn scalar_decimal(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn sort_resources(resources: &mut [Resource], sort: &[SortKey]) {
    resources.sort_by(|a, b| {
        for key in sort {
            let ordering = match &key.target {
                SortTarget::LastUpdated => a.last_updated.cmp(&b.last_updated),
                SortTarget::Id => a.id.cmp(&b.id),
                SortTarget::Path(path) => {
                    let av = first_text(a, path);
                    let bv = first_text(b, path);
                    // absent values sort after present ones either way
                    match (av, bv) {
                        (Some(av), Some(bv)) => av.cmp(&bv),
                        (Some(_), None) => return std::cmp::Ordering::Less,
                        (None, Some(_)) => return std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    }
                }
            };
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        // Stable default: newest first, id as tiebreak
        b.last_updated
            .cmp(&a.last_updated)
            .then_with(|| b.id.cmp(&a.id))
    });
}

fn first_text(resource: &Resource, path: &str) -> Option<String> {
    collect_values(&resource.resource, path)
        .into_iter()
        .find_map(scalar_text)
}
