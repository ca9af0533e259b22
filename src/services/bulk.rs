//! Bulk NDJSON import
//!
//! `$import` records a job document and returns immediately; a bounded
//! pool of polling workers claims pending jobs and streams each NDJSON
//! source through the normal write path, preserving source
//! `meta.lastUpdated` timestamps. `$import-status/{id}` reads the job
//! back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;

use crate::config::{BucketConfig, Config};
use crate::db::search::fragment::{QueryFragment, QueryMode, StoreQuery};
use crate::db::traits::{Datastore, TransactionContext};
use crate::models::bulk::{BulkImportSource, BulkJob, BulkJobStatus, BULK_JOB_RESOURCE_TYPE};
use crate::models::fhir::Resource;
use crate::request_context::TenantContext;
use crate::services::meta::MetaOrchestrator;
use crate::services::put::{put_in_tx, WriteOptions};
use crate::services::validation::ValidationService;
use crate::{Error, Result};

const MAX_RECORDED_ERRORS: usize = 20;

#[derive(Clone)]
pub struct BulkService<S: Datastore> {
    store: S,
    meta: MetaOrchestrator,
    validation: ValidationService,
}

impl<S: Datastore> BulkService<S> {
    pub fn new(store: S, meta: MetaOrchestrator, validation: ValidationService) -> Self {
        Self {
            store,
            meta,
            validation,
        }
    }

    /// POST /$import with a Parameters resource naming NDJSON sources.
    pub async fn submit(&self, ctx: &TenantContext, parameters: JsonValue) -> Result<BulkJob> {
        let sources = parse_import_parameters(&parameters)?;
        let job = BulkJob::new(sources);
        self.save_job(&ctx.tenant_id, &job, 1).await?;
        tracing::info!(
            tenant = %ctx.tenant_id,
            job = %job.id,
            sources = job.sources.len(),
            "accepted bulk import job"
        );
        Ok(job)
    }

    /// GET /$import-status/{id}
    pub async fn status(&self, ctx: &TenantContext, id: &str) -> Result<BulkJob> {
        let resource = self
            .store
            .read(&ctx.tenant_id, BULK_JOB_RESOURCE_TYPE, id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                resource_type: BULK_JOB_RESOURCE_TYPE.to_string(),
                id: id.to_string(),
            })?;
        Ok(serde_json::from_value(resource.resource)
            .map_err(|e| Error::Internal(format!("corrupt bulk job document: {e}")))?)
    }

    async fn save_job(&self, tenant: &str, job: &BulkJob, version: i32) -> Result<()> {
        let body = serde_json::to_value(job)
            .map_err(|e| Error::Internal(format!("serializing bulk job: {e}")))?;
        self.store
            .insert_version(
                tenant,
                &Resource {
                    id: job.id.clone(),
                    resource_type: BULK_JOB_RESOURCE_TYPE.to_string(),
                    version_id: version,
                    resource: body,
                    last_updated: Utc::now(),
                    deleted: false,
                },
            )
            .await
    }

    /// Claim the oldest pending job for a tenant. Claiming bumps the
    /// job version; a competing claim loses with a version conflict.
    pub async fn claim_pending(&self, tenant: &str) -> Result<Option<(BulkJob, i32)>> {
        let query = StoreQuery {
            resource_type: BULK_JOB_RESOURCE_TYPE.to_string(),
            must: vec![QueryFragment::Term {
                path: "status".to_string(),
                value: "pending".to_string(),
            }],
            must_not: vec![QueryFragment::Tombstone],
            offset: 0,
            count: 1,
            sort: Vec::new(),
            mode: QueryMode::Fetch,
        };
        let candidates = self.store.execute_search(tenant, &query).await?;
        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let mut job: BulkJob = serde_json::from_value(candidate.resource)
            .map_err(|e| Error::Internal(format!("corrupt bulk job document: {e}")))?;
        job.status = BulkJobStatus::InProgress;
        job.started_at = Some(Utc::now());
        let next_version = candidate.version_id + 1;
        match self.save_job(tenant, &job, next_version).await {
            Ok(()) => Ok(Some((job, next_version))),
            Err(Error::VersionConflict(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run a claimed job to completion and persist the final tallies.
    pub async fn run_job(
        &self,
        tenant: &str,
        bucket: &BucketConfig,
        mut job: BulkJob,
        version: i32,
    ) {
        let ctx = TenantContext::new(tenant, format!("bulk-{}", job.id)).with_user("bulk-import");

        for source in job.sources.clone() {
            match self.import_source(&ctx, bucket, &source).await {
                Ok((imported, failed, mut errors)) => {
                    job.resources_imported += imported;
                    job.resources_failed += failed;
                    job.errors.append(&mut errors);
                }
                Err(e) => {
                    job.resources_failed += 1;
                    job.errors.push(format!("{}: {e}", source.url));
                }
            }
            job.errors.truncate(MAX_RECORDED_ERRORS);
        }

        job.status = if job.resources_imported == 0 && job.resources_failed > 0 {
            BulkJobStatus::Failed
        } else {
            BulkJobStatus::Completed
        };
        job.completed_at = Some(Utc::now());

        if let Err(e) = self.save_job(tenant, &job, version + 1).await {
            tracing::error!(job = %job.id, error = %e, "failed to persist bulk job result");
        }
        tracing::info!(
            tenant,
            job = %job.id,
            imported = job.resources_imported,
            failed = job.resources_failed,
            status = ?job.status,
            "bulk import job finished"
        );
    }

    async fn import_source(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        source: &BulkImportSource,
    ) -> Result<(u64, u64, Vec<String>)> {
        let path = source.url.strip_prefix("file://").unwrap_or(&source.url);
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Internal(format!("reading {path}: {e}")))?;

        let mut imported = 0u64;
        let mut failed = 0u64;
        let mut errors = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match self.import_line(ctx, bucket, &source.resource_type, line).await {
                Ok(()) => imported += 1,
                Err(e) => {
                    failed += 1;
                    if errors.len() < MAX_RECORDED_ERRORS {
                        errors.push(format!("{path}:{}: {e}", line_no + 1));
                    }
                }
            }
        }
        Ok((imported, failed, errors))
    }

    async fn import_line(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        declared_type: &str,
        line: &str,
    ) -> Result<()> {
        let body: JsonValue = serde_json::from_str(line)
            .map_err(|e| Error::InvalidResource(format!("invalid JSON: {e}")))?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut tx = self.store.begin_transaction().await?;
        let result = put_in_tx(
            &mut tx,
            ctx,
            bucket,
            &self.meta,
            &self.validation,
            declared_type,
            &id,
            body,
            WriteOptions {
                preserve_last_updated: true,
            },
        )
        .await;
        match result {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}

fn parse_import_parameters(parameters: &JsonValue) -> Result<Vec<BulkImportSource>> {
    if parameters.get("resourceType").and_then(|v| v.as_str()) != Some("Parameters") {
        return Err(Error::InvalidResource(
            "$import expects a Parameters resource".to_string(),
        ));
    }
    let mut sources = Vec::new();
    let entries = parameters
        .get("parameter")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();
    for entry in entries {
        if entry.get("name").and_then(|n| n.as_str()) != Some("input") {
            continue;
        }
        let parts = entry
            .get("part")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();
        let mut resource_type = None;
        let mut url = None;
        for part in parts {
            match part.get("name").and_then(|n| n.as_str()) {
                Some("type") => {
                    resource_type = part
                        .get("valueCode")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                }
                Some("url") => {
                    url = part
                        .get("valueUrl")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                }
                _ => {}
            }
        }
        match (resource_type, url) {
            (Some(resource_type), Some(url)) => sources.push(BulkImportSource {
                resource_type,
                url,
            }),
            _ => {
                return Err(Error::InvalidResource(
                    "each $import input needs 'type' and 'url' parts".to_string(),
                ))
            }
        }
    }
    if sources.is_empty() {
        return Err(Error::InvalidResource(
            "$import requires at least one input".to_string(),
        ));
    }
    Ok(sources)
}

/// Polling worker pool. One loop scans every configured tenant for
/// pending jobs; a semaphore bounds how many run at once.
pub fn spawn_workers<S: Datastore>(
    service: BulkService<S>,
    config: Arc<Config>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(config.workers.max_concurrent_jobs));
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.workers.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let mut tenants: Vec<String> =
                config.tenants.buckets.keys().cloned().collect();
            if tenants.is_empty() {
                tenants.push(config.tenants.default_tenant.clone());
            }
            for tenant in tenants {
                let Some(bucket) = config.tenants.resolve_bucket(&tenant) else {
                    continue;
                };
                let claimed = match service.claim_pending(&tenant).await {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        tracing::error!(tenant = %tenant, error = %e, "bulk job poll failed");
                        continue;
                    }
                };
                if let Some((job, version)) = claimed {
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        return;
                    };
                    let service = service.clone();
                    tokio::spawn(async move {
                        service.run_job(&tenant, &bucket, job, version).await;
                        drop(permit);
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryResourceStore;
    use crate::db::traits::ResourceStore;
    use serde_json::json;
    use std::io::Write;

    fn ctx() -> TenantContext {
        TenantContext::new("t1", "req-1")
    }

    fn service(store: &InMemoryResourceStore) -> BulkService<InMemoryResourceStore> {
        BulkService::new(
            store.clone(),
            MetaOrchestrator::new(),
            ValidationService::new(),
        )
    }

    fn import_params(path: &str) -> JsonValue {
        json!({
            "resourceType": "Parameters",
            "parameter": [{
                "name": "input",
                "part": [
                    {"name": "type", "valueCode": "Patient"},
                    {"name": "url", "valueUrl": path}
                ]
            }]
        })
    }

    #[tokio::test]
    async fn submit_records_a_pending_job() {
        let store = InMemoryResourceStore::new();
        let service = service(&store);
        let job = service
            .submit(&ctx(), import_params("/tmp/patients.ndjson"))
            .await
            .unwrap();
        assert_eq!(job.status, BulkJobStatus::Pending);

        let fetched = service.status(&ctx(), &job.id).await.unwrap();
        assert_eq!(fetched.status, BulkJobStatus::Pending);
        assert_eq!(fetched.sources.len(), 1);
    }

    #[tokio::test]
    async fn submit_rejects_inputs_without_url() {
        let store = InMemoryResourceStore::new();
        let params = json!({
            "resourceType": "Parameters",
            "parameter": [{
                "name": "input",
                "part": [{"name": "type", "valueCode": "Patient"}]
            }]
        });
        let err = service(&store).submit(&ctx(), params).await.unwrap_err();
        assert!(matches!(err, Error::InvalidResource(_)));
    }

    #[tokio::test]
    async fn status_of_unknown_job_is_not_found() {
        let store = InMemoryResourceStore::new();
        let err = service(&store).status(&ctx(), "ghost").await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn job_imports_ndjson_and_preserves_timestamps() {
        let store = InMemoryResourceStore::new();
        let service = service(&store);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.ndjson");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "{}",
            json!({"resourceType": "Patient", "id": "p1", "meta": {"lastUpdated": "2020-06-01T00:00:00Z"}})
        )
        .unwrap();
        writeln!(file, "not valid json").unwrap();
        writeln!(file, "{}", json!({"resourceType": "Patient", "id": "p2"})).unwrap();

        let job = service
            .submit(&ctx(), import_params(path.to_str().unwrap()))
            .await
            .unwrap();
        let (claimed, version) = service.claim_pending("t1").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        service
            .run_job("t1", &BucketConfig::default(), claimed, version)
            .await;

        let finished = service.status(&ctx(), &job.id).await.unwrap();
        assert_eq!(finished.status, BulkJobStatus::Completed);
        assert_eq!(finished.resources_imported, 2);
        assert_eq!(finished.resources_failed, 1);

        let p1 = store.read("t1", "Patient", "p1").await.unwrap().unwrap();
        assert_eq!(
            p1.resource["meta"]["lastUpdated"]
                .as_str()
                .unwrap()
                .starts_with("2020-06-01"),
            true
        );
    }
}
