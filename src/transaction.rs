//! Transaction boundary collaborator wrapped around every chunk commit.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::error::StepResult;

/// Identifier of a transaction opened by a [`TransactionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> StepResult<TransactionId>;
    async fn commit(&self, transaction: TransactionId) -> StepResult<()>;
    async fn rollback(&self, transaction: TransactionId) -> StepResult<()>;
}

/// Transaction manager for steps without a transactional resource.
///
/// It only counts boundaries, which makes commit/rollback behaviour observable in tests.
#[derive(Debug, Default)]
pub struct ResourcelessTransactionManager {
    next_id: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl ResourcelessTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionManager for ResourcelessTransactionManager {
    async fn begin(&self) -> StepResult<TransactionId> {
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        trace!(transaction = id.0, "begin");
        Ok(id)
    }

    async fn commit(&self, transaction: TransactionId) -> StepResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        trace!(transaction = transaction.0, "commit");
        Ok(())
    }

    async fn rollback(&self, transaction: TransactionId) -> StepResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        trace!(transaction = transaction.0, "rollback");
        Ok(())
    }
}
