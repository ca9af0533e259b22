//! Create and update writes
//!
//! `put_in_tx`/`create_in_tx` are the single write path for resources:
//! standalone requests wrap them in their own transaction, the bundle
//! processor reuses them inside one shared transaction. Validation,
//! meta orchestration and version assignment are identical either way.

use serde_json::{json, Value as JsonValue};

use crate::config::BucketConfig;
use crate::db::traits::{Datastore, TransactionContext};
use crate::models::fhir::{body_last_updated, Resource, ResourceOperation};
use crate::request_context::TenantContext;
use crate::services::meta::{MetaOrchestrator, MetaRequest};
use crate::services::validation::ValidationService;
use crate::{Error, Result};

/// Knobs for the shared write path.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Keep the body's `meta.lastUpdated` instead of stamping now.
    /// Used by bulk import to preserve source timestamps.
    pub preserve_last_updated: bool,
}

pub(crate) async fn put_in_tx<C: TransactionContext>(
    tx: &mut C,
    ctx: &TenantContext,
    bucket: &BucketConfig,
    meta: &MetaOrchestrator,
    validation: &ValidationService,
    resource_type: &str,
    id: &str,
    mut body: JsonValue,
    options: WriteOptions,
) -> Result<(Resource, ResourceOperation)> {
    validation.validate(bucket, resource_type, &body)?;

    if let Some(body_id) = body.get("id").and_then(|v| v.as_str()) {
        if body_id != id {
            return Err(Error::InvalidResource(format!(
                "body id '{body_id}' does not match request id '{id}'"
            )));
        }
    }
    body["id"] = json!(id);

    let head = tx.read_head(&ctx.tenant_id, resource_type, id).await?;
    let (request, operation) = match &head {
        Some(head) if head.deleted => {
            return Err(Error::VersionConflict(format!(
                "{resource_type}/{id} has been deleted and cannot be updated"
            )));
        }
        Some(head) => (
            MetaRequest::for_update(ctx.audit_user(), head.version_id + 1),
            ResourceOperation::Updated,
        ),
        None => (
            MetaRequest::for_create(ctx.audit_user()),
            ResourceOperation::Created,
        ),
    };

    let request = request.with_profiles(validation.policy_profiles(bucket, resource_type));
    let request = if options.preserve_last_updated {
        request.preserving_last_updated(body_last_updated(&body))
    } else {
        request
    };

    let applied = meta.apply(&mut body, &request);
    let resource = Resource {
        id: id.to_string(),
        resource_type: resource_type.to_string(),
        version_id: applied.version_id,
        resource: body,
        last_updated: applied.last_updated,
        deleted: false,
    };
    tx.insert_version(&ctx.tenant_id, &resource).await?;

    tracing::info!(
        tenant = %ctx.tenant_id,
        resource = %format!("{resource_type}/{id}"),
        version = resource.version_id,
        op = ?operation,
        "stored resource"
    );
    Ok((resource, operation))
}

/// Server-assigned-id create (POST). The caller may preassign the id
/// for bundle entries whose urn:uuid fullUrls were already resolved.
pub(crate) async fn create_in_tx<C: TransactionContext>(
    tx: &mut C,
    ctx: &TenantContext,
    bucket: &BucketConfig,
    meta: &MetaOrchestrator,
    validation: &ValidationService,
    resource_type: &str,
    mut body: JsonValue,
    preassigned_id: Option<String>,
    options: WriteOptions,
) -> Result<Resource> {
    let id = preassigned_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    // Client-supplied ids are ignored on create, per REST semantics
    if let Some(object) = body.as_object_mut() {
        object.remove("id");
    }
    let (resource, _) = put_in_tx(
        tx,
        ctx,
        bucket,
        meta,
        validation,
        resource_type,
        &id,
        body,
        options,
    )
    .await?;
    Ok(resource)
}

#[derive(Clone)]
pub struct PutService<S: Datastore> {
    store: S,
    meta: MetaOrchestrator,
    validation: ValidationService,
}

impl<S: Datastore> PutService<S> {
    pub fn new(store: S, meta: MetaOrchestrator, validation: ValidationService) -> Self {
        Self {
            store,
            meta,
            validation,
        }
    }

    /// PUT /{type}/{id}: update-or-create in its own transaction.
    pub async fn update_or_create(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        resource_type: &str,
        id: &str,
        body: JsonValue,
    ) -> Result<(Resource, ResourceOperation)> {
        let mut tx = self.store.begin_transaction().await?;
        let result = put_in_tx(
            &mut tx,
            ctx,
            bucket,
            &self.meta,
            &self.validation,
            resource_type,
            id,
            body,
            WriteOptions::default(),
        )
        .await;
        match result {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// POST /{type}: create with a server-assigned id.
    pub async fn create(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        resource_type: &str,
        body: JsonValue,
    ) -> Result<Resource> {
        let mut tx = self.store.begin_transaction().await?;
        let result = create_in_tx(
            &mut tx,
            ctx,
            bucket,
            &self.meta,
            &self.validation,
            resource_type,
            body,
            None,
            WriteOptions::default(),
        )
        .await;
        match result {
            Ok(resource) => {
                tx.commit().await?;
                Ok(resource)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}
