use sea_orm::DatabaseTransaction;
use tokio_util::sync::CancellationToken;

/// Per-request context threaded through the engine and the store. Carries an
/// optional ambient transaction, reused by store operations instead of the
/// pool connection, and the request-scoped cancellation token.
#[derive(Clone)]
pub struct RequestContext<'a> {
    txn: Option<&'a DatabaseTransaction>,
    cancel: CancellationToken,
}

impl<'a> RequestContext<'a> {
    pub fn new() -> Self {
        Self {
            txn: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { txn: None, cancel }
    }

    /// This context rebound to a transaction. Store operations resolve their
    /// executor from the rebound context until it is dropped.
    pub fn scoped<'b>(&self, txn: &'b DatabaseTransaction) -> RequestContext<'b> {
        RequestContext {
            txn: Some(txn),
            cancel: self.cancel.clone(),
        }
    }

    pub fn transaction(&self) -> Option<&'a DatabaseTransaction> {
        self.txn
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Default for RequestContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}
