//! Shared application state, generic over the storage backend so the
//! same router serves Postgres in production and the in-memory store in
//! tests.

use std::sync::Arc;

use crate::config::{BucketConfig, Config};
use crate::db::traits::Datastore;
use crate::request_context::TenantContext;
use crate::services::bulk::BulkService;
use crate::services::bundle::BundleProcessor;
use crate::services::delete::DeleteService;
use crate::services::meta::MetaOrchestrator;
use crate::services::patch::PatchService;
use crate::services::put::PutService;
use crate::services::search::SearchService;
use crate::services::validation::ValidationService;
use crate::{Error, Result};

#[derive(Clone)]
pub struct AppState<S: Datastore> {
    pub config: Arc<Config>,
    pub store: S,
    pub put: PutService<S>,
    pub delete: DeleteService<S>,
    pub patch: PatchService<S>,
    pub bundles: BundleProcessor<S>,
    pub search: SearchService<S>,
    pub bulk: BulkService<S>,
}

impl<S: Datastore> AppState<S> {
    pub fn new(config: Arc<Config>, store: S) -> Self {
        let meta = MetaOrchestrator::new();
        let validation = ValidationService::new();
        Self {
            put: PutService::new(store.clone(), meta.clone(), validation.clone()),
            delete: DeleteService::new(store.clone(), meta.clone()),
            patch: PatchService::new(store.clone(), meta.clone(), validation.clone()),
            bundles: BundleProcessor::new(
                store.clone(),
                meta.clone(),
                validation.clone(),
                config.store.transaction_retries,
            ),
            search: SearchService::new(store.clone(), config.server.public_base_url()),
            bulk: BulkService::new(store.clone(), meta, validation),
            config,
            store,
        }
    }

    /// Bucket settings for the request's tenant; the middleware already
    /// verified the tenant exists, so a miss here is a logic error.
    pub fn bucket_for(&self, ctx: &TenantContext) -> Result<BucketConfig> {
        self.config
            .tenants
            .resolve_bucket(&ctx.tenant_id)
            .ok_or_else(|| Error::UnknownTenant(ctx.tenant_id.clone()))
    }
}
