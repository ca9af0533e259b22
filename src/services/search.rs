//! Search orchestration: compile the request, run it against the
//! store, and render a searchset Bundle.

use serde_json::{json, Value as JsonValue};

use crate::db::search::fragment::QueryMode;
use crate::db::search::params::{SearchParameters, TotalMode};
use crate::db::search::{self};
use crate::db::traits::Datastore;
use crate::request_context::TenantContext;
use crate::services::summary::apply_output_filters;
use crate::Result;

#[derive(Clone)]
pub struct SearchService<S: Datastore> {
    store: S,
    base_url: String,
}

impl<S: Datastore> SearchService<S> {
    pub fn new(store: S, base_url: String) -> Self {
        Self { store, base_url }
    }

    /// GET /{type}?... Returns a searchset Bundle. Invalid parameters
    /// fail here, before any store query runs.
    pub async fn search(
        &self,
        ctx: &TenantContext,
        resource_type: &str,
        params: &SearchParameters,
        raw_query: Option<&str>,
    ) -> Result<JsonValue> {
        let query = search::compile(resource_type, params)?;

        let self_link = match raw_query {
            Some(q) if !q.is_empty() => format!("{}/{resource_type}?{q}", self.base_url),
            _ => format!("{}/{resource_type}", self.base_url),
        };

        if query.mode == QueryMode::CountOnly {
            let total = self.store.execute_count(&ctx.tenant_id, &query).await?;
            return Ok(json!({
                "resourceType": "Bundle",
                "type": "searchset",
                "total": total,
                "link": [{"relation": "self", "url": self_link}],
            }));
        }

        let resources = self.store.execute_search(&ctx.tenant_id, &query).await?;
        let total = match params.total {
            TotalMode::None => None,
            // A separate count query either way; estimate has no
            // cheaper source in this store
            TotalMode::Estimate | TotalMode::Accurate => {
                Some(self.store.execute_count(&ctx.tenant_id, &query).await?)
            }
        };

        let entries: Vec<JsonValue> = resources
            .iter()
            .map(|r| {
                json!({
                    "fullUrl": format!("{}/{}/{}", self.base_url, r.resource_type, r.id),
                    "resource": apply_output_filters(params, &r.resource),
                    "search": {"mode": "match"},
                })
            })
            .collect();

        let mut links = vec![json!({"relation": "self", "url": self_link})];
        if resources.len() == query.count {
            let next_offset = query.offset + query.count;
            links.push(json!({
                "relation": "next",
                "url": format!(
                    "{}/{resource_type}?_count={}&_offset={next_offset}",
                    self.base_url, query.count
                ),
            }));
        }

        let mut bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "link": links,
            "entry": entries,
        });
        if let Some(total) = total {
            bundle["total"] = json!(total);
        }
        Ok(bundle)
    }
}
