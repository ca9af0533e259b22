//! Storage abstraction
//!
//! The store keeps every version of every resource as an envelope row;
//! the head of a resource is its highest version. Tombstones are
//! ordinary versions with `deleted = true`. All methods are
//! tenant-scoped; there is no ambient tenant state anywhere.

use async_trait::async_trait;

use crate::db::search::fragment::StoreQuery;
use crate::models::fhir::Resource;
use crate::Result;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Current version if the resource exists and is not tombstoned.
    async fn read(&self, tenant: &str, resource_type: &str, id: &str)
        -> Result<Option<Resource>>;

    /// Current version including tombstones. Write paths use this to
    /// see deletion state and the version to continue from.
    async fn read_head(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>>;

    /// A specific stored version (vread), tombstones included.
    async fn read_version(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
        version_id: i32,
    ) -> Result<Option<Resource>>;

    /// All versions, newest first.
    async fn history(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<Resource>>;

    /// Append a new version and make it current. The caller has already
    /// assigned `version_id` from the head it read.
    async fn insert_version(&self, tenant: &str, resource: &Resource) -> Result<()>;

    /// Run a compiled query, returning current matching versions in
    /// sort order with paging applied.
    async fn execute_search(&self, tenant: &str, query: &StoreQuery) -> Result<Vec<Resource>>;

    /// Total match count for a compiled query, ignoring paging.
    async fn execute_count(&self, tenant: &str, query: &StoreQuery) -> Result<i64>;
}

/// An open transaction. Reads observe the transaction's own writes.
#[async_trait]
pub trait TransactionContext: Send {
    async fn read_head(
        &mut self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Resource>>;

    async fn insert_version(&mut self, tenant: &str, resource: &Resource) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

#[async_trait]
pub trait ResourceTransaction: Send + Sync {
    type Context: TransactionContext;

    async fn begin_transaction(&self) -> Result<Self::Context>;
}

/// Bound alias for everything the service layer needs from a backend.
pub trait Datastore: ResourceStore + ResourceTransaction + Clone + Send + Sync + 'static {}

impl<T> Datastore for T where T: ResourceStore + ResourceTransaction + Clone + Send + Sync + 'static
{}
