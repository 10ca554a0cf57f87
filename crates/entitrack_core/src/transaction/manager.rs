//! Transaction manager.

use crate::entity::EntityArena;
use crate::error::{CoreError, CoreResult};
use crate::transaction::{
    CompletionStatus, TransactionContext, TransactionDefinition, TransactionState,
    TransactionSynchronization,
};
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Begins transactions and drives their completion protocol.
///
/// On commit every registered synchronization receives `before_commit` in
/// ascending order. The first failure rolls the transaction back. Whatever
/// the outcome, every synchronization (including those registered while
/// committing) then receives `after_completion`. Failures of
/// `after_completion` are logged and never change the outcome.
pub struct TransactionManager {
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Active transactions.
    active_txns: RwLock<Vec<TransactionId>>,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new() -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            active_txns: RwLock::new(Vec::new()),
        }
    }

    /// Begins a new transaction.
    pub fn begin(&self, definition: TransactionDefinition) -> TransactionContext {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        debug!(txid = %txid, name = ?definition.name, read_only = definition.read_only, "begin transaction");
        self.active_txns.write().push(txid);
        TransactionContext::new(txid, definition)
    }

    /// Commits a transaction.
    ///
    /// A transaction marked rollback-only is rolled back and reported as
    /// [`CoreError::RolledBack`].
    pub fn commit(&self, ctx: &mut TransactionContext, arena: &mut EntityArena) -> CoreResult<()> {
        if ctx.state() != TransactionState::Active {
            return Err(CoreError::invalid_operation(format!(
                "cannot commit transaction {} in state {:?}",
                ctx.id(),
                ctx.state()
            )));
        }
        if ctx.is_rollback_only() {
            self.rollback(ctx, arena)?;
            return Err(CoreError::RolledBack {
                txid: ctx.id(),
                reason: "transaction is marked rollback-only".to_string(),
            });
        }

        debug!(txid = %ctx.id(), "commit transaction");
        ctx.set_state(TransactionState::Committing);

        let mut synchronizations = ctx.take_synchronizations();
        synchronizations.sort_by_key(|s| s.order());

        let read_only = ctx.is_read_only();
        let mut failure = None;
        for synchronization in &mut synchronizations {
            if let Err(err) = synchronization.before_commit(ctx, arena, read_only) {
                failure = Some(err);
                break;
            }
        }
        synchronizations.extend(ctx.take_synchronizations());

        match failure {
            None => {
                ctx.set_state(TransactionState::Committed);
                self.complete(ctx, arena, synchronizations, CompletionStatus::Committed);
                Ok(())
            }
            Some(err) => {
                debug!(txid = %ctx.id(), error = %err, "before-commit failed, rolling back");
                ctx.set_state(TransactionState::RolledBack);
                self.complete(ctx, arena, synchronizations, CompletionStatus::RolledBack);
                Err(err)
            }
        }
    }

    /// Rolls a transaction back.
    pub fn rollback(&self, ctx: &mut TransactionContext, arena: &mut EntityArena) -> CoreResult<()> {
        if ctx.state() != TransactionState::Active {
            return Err(CoreError::invalid_operation(format!(
                "cannot roll back transaction {} in state {:?}",
                ctx.id(),
                ctx.state()
            )));
        }
        debug!(txid = %ctx.id(), "rollback transaction");
        let mut synchronizations = ctx.take_synchronizations();
        synchronizations.sort_by_key(|s| s.order());
        ctx.set_state(TransactionState::RolledBack);
        self.complete(ctx, arena, synchronizations, CompletionStatus::RolledBack);
        Ok(())
    }

    /// Returns the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }

    fn complete(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        mut synchronizations: Vec<Box<dyn TransactionSynchronization>>,
        status: CompletionStatus,
    ) {
        for synchronization in &mut synchronizations {
            if let Err(err) = synchronization.after_completion(ctx, arena, status) {
                error!(txid = %ctx.id(), ?status, error = %err, "after-completion callback failed");
            }
        }
        self.active_txns.write().retain(|&id| id != ctx.id());
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}
