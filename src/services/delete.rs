//! Soft delete
//!
//! Deleting writes a tombstone version: a minimal body carrying only
//! identity and meta, flagged `deleted`. The operation is idempotent;
//! deleting a missing or already-deleted resource succeeds without
//! writing anything.

use serde_json::json;

use crate::db::traits::{Datastore, TransactionContext};
use crate::models::fhir::Resource;
use crate::request_context::TenantContext;
use crate::services::meta::{MetaOrchestrator, MetaRequest};
use crate::Result;

pub(crate) async fn delete_in_tx<C: TransactionContext>(
    tx: &mut C,
    ctx: &TenantContext,
    meta: &MetaOrchestrator,
    resource_type: &str,
    id: &str,
) -> Result<Option<Resource>> {
    let head = tx.read_head(&ctx.tenant_id, resource_type, id).await?;
    let head = match head {
        None => return Ok(None),
        Some(head) if head.deleted => return Ok(None),
        Some(head) => head,
    };

    // Tombstones keep identity and meta, nothing else
    let mut body = json!({
        "resourceType": resource_type,
        "id": id,
        "meta": head.resource.get("meta").cloned().unwrap_or_else(|| json!({})),
    });
    let request = MetaRequest::for_delete(ctx.audit_user(), head.version_id + 1);
    let applied = meta.apply(&mut body, &request);

    let tombstone = Resource {
        id: id.to_string(),
        resource_type: resource_type.to_string(),
        version_id: applied.version_id,
        resource: body,
        last_updated: applied.last_updated,
        deleted: true,
    };
    tx.insert_version(&ctx.tenant_id, &tombstone).await?;

    tracing::info!(
        tenant = %ctx.tenant_id,
        resource = %format!("{resource_type}/{id}"),
        version = tombstone.version_id,
        "tombstoned resource"
    );
    Ok(Some(tombstone))
}

#[derive(Clone)]
pub struct DeleteService<S: Datastore> {
    store: S,
    meta: MetaOrchestrator,
}

impl<S: Datastore> DeleteService<S> {
    pub fn new(store: S, meta: MetaOrchestrator) -> Self {
        Self { store, meta }
    }

    /// DELETE /{type}/{id}. Returns the tombstone if one was written.
    pub async fn delete(
        &self,
        ctx: &TenantContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>> {
        let mut tx = self.store.begin_transaction().await?;
        let result = delete_in_tx(&mut tx, ctx, &self.meta, resource_type, id).await;
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
}
