//! Bundle processing
//!
//! `transaction` bundles run inside one store transaction: any entry
//! failure rolls back every write and fails the request. `batch`
//! bundles run each entry independently and report per-entry outcomes.
//! Both reuse the exact same write path as the standalone endpoints.

use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use crate::config::BucketConfig;
use crate::db::traits::{Datastore, TransactionContext};
use crate::error::{operation_outcome, status_line};
use crate::models::fhir::Resource;
use crate::request_context::TenantContext;
use crate::services::delete::delete_in_tx;
use crate::services::meta::MetaOrchestrator;
use crate::services::put::{create_in_tx, put_in_tx, WriteOptions};
use crate::services::validation::ValidationService;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct ParsedEntry {
    method: String,
    /// "Type" for POST, "Type/id" for PUT and DELETE.
    url: String,
    resource: Option<JsonValue>,
    /// Server id assigned up front for POST entries, so urn:uuid
    /// references can be resolved before anything executes.
    assigned_id: Option<String>,
}

struct EntryOutcome {
    status: &'static str,
    location: Option<String>,
    resource: Option<Resource>,
}

#[derive(Clone)]
pub struct BundleProcessor<S: Datastore> {
    store: S,
    meta: MetaOrchestrator,
    validation: ValidationService,
    transaction_retries: u32,
}

impl<S: Datastore> BundleProcessor<S> {
    pub fn new(
        store: S,
        meta: MetaOrchestrator,
        validation: ValidationService,
        transaction_retries: u32,
    ) -> Self {
        Self {
            store,
            meta,
            validation,
            transaction_retries,
        }
    }

    pub async fn process(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        bundle: JsonValue,
    ) -> Result<JsonValue> {
        if bundle.get("resourceType").and_then(|v| v.as_str()) != Some("Bundle") {
            return Err(Error::InvalidResource(
                "request body must be a Bundle".to_string(),
            ));
        }
        let bundle_type = bundle
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidBundleType("Bundle.type is missing".to_string()))?;

        let entries = parse_entries(&bundle)?;
        match bundle_type {
            "transaction" => self.transaction(ctx, bucket, entries).await,
            "batch" => self.batch(ctx, bucket, entries).await,
            other => Err(Error::InvalidBundleType(format!(
                "Bundle type '{other}' is not supported; use transaction or batch"
            ))),
        }
    }

    async fn transaction(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        entries: Vec<ParsedEntry>,
    ) -> Result<JsonValue> {
        let mut attempt = 0;
        loop {
            match self.try_transaction(ctx, bucket, entries.clone()).await {
                Ok(response) => return Ok(response),
                Err(Error::Database(e)) if attempt < self.transaction_retries => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "bundle transaction hit a storage conflict, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_transaction(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        entries: Vec<ParsedEntry>,
    ) -> Result<JsonValue> {
        let mut tx = self.store.begin_transaction().await?;
        let mut outcomes = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match self.execute_entry(&mut tx, ctx, bucket, entry).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tx.rollback().await?;
                    tracing::info!(
                        tenant = %ctx.tenant_id,
                        entry = index,
                        error = %e,
                        "bundle transaction rolled back"
                    );
                    return Err(e);
                }
            }
        }
        tx.commit().await?;
        Ok(response_bundle("transaction-response", outcomes))
    }

    async fn batch(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        entries: Vec<ParsedEntry>,
    ) -> Result<JsonValue> {
        let mut rendered = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut tx = self.store.begin_transaction().await?;
            match self.execute_entry(&mut tx, ctx, bucket, entry).await {
                Ok(outcome) => {
                    tx.commit().await?;
                    rendered.push(render_outcome(outcome));
                }
                Err(e) => {
                    tx.rollback().await?;
                    rendered.push(json!({
                        "response": {
                            "status": status_line(&e),
                            "outcome": operation_outcome(&e),
                        }
                    }));
                }
            }
        }
        Ok(json!({
            "resourceType": "Bundle",
            "type": "batch-response",
            "entry": rendered,
        }))
    }

    async fn execute_entry<C: TransactionContext>(
        &self,
        tx: &mut C,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        entry: &ParsedEntry,
    ) -> Result<EntryOutcome> {
        match entry.method.as_str() {
            "POST" => {
                let body = entry_body(entry)?;
                let resource = create_in_tx(
                    tx,
                    ctx,
                    bucket,
                    &self.meta,
                    &self.validation,
                    &entry.url,
                    body,
                    entry.assigned_id.clone(),
                    WriteOptions::default(),
                )
                .await?;
                Ok(EntryOutcome {
                    status: "201 Created",
                    location: Some(location_of(&resource)),
                    resource: Some(resource),
                })
            }
            "PUT" => {
                let (resource_type, id) = split_type_and_id(&entry.url)?;
                let body = entry_body(entry)?;
                let (resource, operation) = put_in_tx(
                    tx,
                    ctx,
                    bucket,
                    &self.meta,
                    &self.validation,
                    resource_type,
                    id,
                    body,
                    WriteOptions::default(),
                )
                .await?;
                Ok(EntryOutcome {
                    status: operation.status_line(),
                    location: Some(location_of(&resource)),
                    resource: Some(resource),
                })
            }
            "DELETE" => {
                let (resource_type, id) = split_type_and_id(&entry.url)?;
                delete_in_tx(tx, ctx, &self.meta, resource_type, id).await?;
                Ok(EntryOutcome {
                    status: "204 No Content",
                    location: None,
                    resource: None,
                })
            }
            other => Err(Error::UnsupportedOperation(format!(
                "bundle entry method '{other}' is not supported"
            ))),
        }
    }
}

fn entry_body(entry: &ParsedEntry) -> Result<JsonValue> {
    entry.resource.clone().ok_or_else(|| {
        Error::InvalidResource(format!(
            "bundle entry {} {} is missing a resource",
            entry.method, entry.url
        ))
    })
}

fn location_of(resource: &Resource) -> String {
    format!(
        "{}/{}/_history/{}",
        resource.resource_type, resource.id, resource.version_id
    )
}

fn split_type_and_id(url: &str) -> Result<(&str, &str)> {
    match url.split('/').collect::<Vec<_>>().as_slice() {
        [resource_type, id] if !resource_type.is_empty() && !id.is_empty() => {
            Ok((resource_type, id))
        }
        _ => Err(Error::InvalidResource(format!(
            "bundle entry url '{url}' must be Type/id"
        ))),
    }
}

/// Parse entries and resolve urn:uuid placeholders: POST entries get
/// their server id up front, and every reference to their fullUrl is
/// rewritten to the final `Type/id` before execution.
fn parse_entries(bundle: &JsonValue) -> Result<Vec<ParsedEntry>> {
    let raw_entries = bundle
        .get("entry")
        .and_then(|e| e.as_array())
        .cloned()
        .unwrap_or_default();

    let mut entries = Vec::with_capacity(raw_entries.len());
    let mut placeholder_map: HashMap<String, String> = HashMap::new();

    for (index, raw) in raw_entries.iter().enumerate() {
        let request = raw.get("request").ok_or_else(|| {
            Error::InvalidResource(format!("bundle entry {index} is missing request"))
        })?;
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| {
                Error::InvalidResource(format!("bundle entry {index} is missing request.method"))
            })?
            .to_ascii_uppercase();
        let url = request
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| {
                Error::InvalidResource(format!("bundle entry {index} is missing request.url"))
            })?
            .trim_start_matches('/')
            .to_string();

        let assigned_id = if method == "POST" {
            let id = uuid::Uuid::new_v4().to_string();
            if let Some(full_url) = raw.get("fullUrl").and_then(|u| u.as_str()) {
                if full_url.starts_with("urn:uuid:") {
                    placeholder_map.insert(full_url.to_string(), format!("{url}/{id}"));
                }
            }
            Some(id)
        } else {
            None
        };

        entries.push(ParsedEntry {
            method,
            url,
            resource: raw.get("resource").cloned(),
            assigned_id,
        });
    }

    if !placeholder_map.is_empty() {
        for entry in &mut entries {
            if let Some(resource) = &mut entry.resource {
                rewrite_references(resource, &placeholder_map);
            }
        }
    }
    Ok(entries)
}

fn rewrite_references(value: &mut JsonValue, map: &HashMap<String, String>) {
    match value {
        JsonValue::Object(object) => {
            for (key, child) in object.iter_mut() {
                if key == "reference" {
                    if let Some(reference) = child.as_str() {
                        if let Some(resolved) = map.get(reference) {
                            *child = json!(resolved);
                            continue;
                        }
                    }
                }
                rewrite_references(child, map);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                rewrite_references(item, map);
            }
        }
        _ => {}
    }
}

fn render_outcome(outcome: EntryOutcome) -> JsonValue {
    let mut response = json!({"status": outcome.status});
    if let Some(location) = outcome.location {
        response["location"] = json!(location);
    }
    let mut entry = json!({"response": response});
    if let Some(resource) = outcome.resource {
        entry["response"]["etag"] = json!(resource.etag());
        entry["resource"] = resource.resource;
    }
    entry
}

fn response_bundle(bundle_type: &str, outcomes: Vec<EntryOutcome>) -> JsonValue {
    let entries: Vec<JsonValue> = outcomes.into_iter().map(render_outcome).collect();
    json!({
        "resourceType": "Bundle",
        "type": bundle_type,
        "entry": entries,
    })
}
