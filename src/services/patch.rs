//! JSON Patch (RFC 6902) applied to the current version, then written
//! through the normal update path so versioning and meta behave exactly
//! like a PUT.

use serde_json::Value as JsonValue;

use crate::config::BucketConfig;
use crate::db::traits::{Datastore, TransactionContext};
use crate::models::fhir::Resource;
use crate::request_context::TenantContext;
use crate::services::meta::MetaOrchestrator;
use crate::services::put::{put_in_tx, WriteOptions};
use crate::services::validation::ValidationService;
use crate::{Error, Result};

#[derive(Clone)]
pub struct PatchService<S: Datastore> {
    store: S,
    meta: MetaOrchestrator,
    validation: ValidationService,
}

impl<S: Datastore> PatchService<S> {
    pub fn new(store: S, meta: MetaOrchestrator, validation: ValidationService) -> Self {
        Self {
            store,
            meta,
            validation,
        }
    }

    pub async fn patch(
        &self,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        resource_type: &str,
        id: &str,
        patch_document: JsonValue,
    ) -> Result<Resource> {
        let patch: json_patch::Patch = serde_json::from_value(patch_document)
            .map_err(|e| Error::InvalidResource(format!("invalid JSON Patch document: {e}")))?;

        let mut tx = self.store.begin_transaction().await?;
        let result = self
            .patch_in_tx(&mut tx, ctx, bucket, resource_type, id, &patch)
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

    async fn patch_in_tx<C: TransactionContext>(
        &self,
        tx: &mut C,
        ctx: &TenantContext,
        bucket: &BucketConfig,
        resource_type: &str,
        id: &str,
        patch: &json_patch::Patch,
    ) -> Result<Resource> {
        let head = tx.read_head(&ctx.tenant_id, resource_type, id).await?;
        let current = match head {
            None => {
                return Err(Error::ResourceNotFound {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                })
            }
            Some(head) if head.deleted => {
                return Err(Error::ResourceDeleted {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                    version_id: Some(head.version_id),
                })
            }
            Some(head) => head,
        };

        let mut patched = current.resource.clone();
        json_patch::patch(&mut patched, patch)
            .map_err(|e| Error::Validation(format!("patch failed to apply: {e}")))?;

        let (resource, _) = put_in_tx(
            tx,
            ctx,
            bucket,
            &self.meta,
            &self.validation,
            resource_type,
            id,
            patched,
            WriteOptions::default(),
        )
        .await?;
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryResourceStore;
    use crate::services::put::PutService;
    use serde_json::json;

    fn ctx() -> TenantContext {
        TenantContext::new("t1", "req-1").with_user("tester")
    }

    async fn setup() -> (PatchService<InMemoryResourceStore>, InMemoryResourceStore) {
        let store = InMemoryResourceStore::new();
        let put = PutService::new(
            store.clone(),
            MetaOrchestrator::new(),
            ValidationService::new(),
        );
        put.update_or_create(
            &ctx(),
            &BucketConfig::default(),
            "Patient",
            "p1",
            json!({"resourceType": "Patient", "active": false}),
        )
        .await
        .unwrap();
        let service = PatchService::new(
            store.clone(),
            MetaOrchestrator::new(),
            ValidationService::new(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn patch_bumps_version_like_an_update() {
        let (service, _) = setup().await;
        let resource = service
            .patch(
                &ctx(),
                &BucketConfig::default(),
                "Patient",
                "p1",
                json!([{"op": "replace", "path": "/active", "value": true}]),
            )
            .await
            .unwrap();
        assert_eq!(resource.version_id, 2);
        assert_eq!(resource.resource["active"], true);
    }

    #[tokio::test]
    async fn malformed_patch_document_is_rejected() {
        let (service, _) = setup().await;
        let err = service
            .patch(
                &ctx(),
                &BucketConfig::default(),
                "Patient",
                "p1",
                json!({"op": "not-an-array"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResource(_)));
    }

    #[tokio::test]
    async fn failing_patch_leaves_resource_untouched() {
        let (service, store) = setup().await;
        let err = service
            .patch(
                &ctx(),
                &BucketConfig::default(),
                "Patient",
                "p1",
                json!([{"op": "test", "path": "/active", "value": true}]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let head = crate::db::traits::ResourceStore::read_head(&store, "t1", "Patient", "p1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.version_id, 1);
    }

    #[tokio::test]
    async fn patch_on_missing_resource_is_not_found() {
        let (service, _) = setup().await;
        let err = service
            .patch(
                &ctx(),
                &BucketConfig::default(),
                "Patient",
                "ghost",
                json!([{"op": "replace", "path": "/active", "value": true}]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }
}
