use async_trait::async_trait;
use sea_orm::DatabaseTransaction;

use crate::authz::context::RequestContext;
use crate::authz::errors::AuthzError;
use crate::authz::types::{Relationship, TraversalRequest, TraversalResponseItem};

/// Capability set over relationship storage. The engine only ever talks to
/// this trait; which backend sits behind it (PostgreSQL, in-memory) is an
/// implementation detail.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Inserts relationships in one operation. Existing 5-tuples are no-ops;
    /// either all rows succeed or the call fails.
    async fn insert_bulk(
        &self,
        ctx: &RequestContext<'_>,
        relationships: &[Relationship],
    ) -> Result<(), AuthzError>;

    /// Removes exact 5-tuples in one operation. Missing rows are no-ops.
    async fn delete_bulk(
        &self,
        ctx: &RequestContext<'_>,
        relationships: &[Relationship],
    ) -> Result<(), AuthzError>;

    /// Enumerates relationship paths from `request.start_on` under the
    /// request's direction and stop conditions, grouped per
    /// (resource, subject) pair.
    async fn list_paths(
        &self,
        ctx: &RequestContext<'_>,
        request: &TraversalRequest,
    ) -> Result<Vec<TraversalResponseItem>, AuthzError>;

    /// Begins a write transaction. An ambient transaction already on the
    /// context is reused rather than nested; new transactions open at read
    /// committed.
    async fn begin(&self, ctx: &RequestContext<'_>) -> Result<StoreTransaction, AuthzError>;
}

/// A possibly-ambient transaction handle. When the handle rides an ambient
/// transaction, commit and rollback are no-ops: the outer scope owns the
/// transaction's fate. An owned, uncommitted handle rolls back on drop, so a
/// panic inside transactional work cannot leave writes behind.
pub struct StoreTransaction {
    inner: Option<DatabaseTransaction>,
}

impl StoreTransaction {
    pub fn ambient() -> Self {
        Self { inner: None }
    }

    pub fn owned(txn: DatabaseTransaction) -> Self {
        Self { inner: Some(txn) }
    }

    /// The context store calls should use inside this transaction.
    pub fn context<'t, 'o: 't>(&'t self, outer: &RequestContext<'o>) -> RequestContext<'t> {
        match &self.inner {
            Some(txn) => outer.scoped(txn),
            None => outer.clone(),
        }
    }

    pub async fn commit(self) -> Result<(), AuthzError> {
        if let Some(txn) = self.inner {
            txn.commit().await?;
        }
        Ok(())
    }

    /// Rollback failures are logged rather than returned: the caller is
    /// already reporting the primary error.
    pub async fn rollback(self) {
        if let Some(txn) = self.inner {
            if let Err(err) = txn.rollback().await {
                tracing::warn!(error = %err, "transaction rollback failed");
            }
        }
    }
}
