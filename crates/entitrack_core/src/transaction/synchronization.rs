//! Transaction synchronization callbacks.

use crate::entity::EntityArena;
use crate::error::CoreResult;
use crate::transaction::{CompletionStatus, TransactionContext};

/// Order of synchronizations that do not care when they run.
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// Callback object registered with a transaction.
///
/// Synchronizations run in ascending [`order`](Self::order); equal orders
/// keep registration order.
pub trait TransactionSynchronization: Send {
    /// Returns the position among other synchronizations.
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    /// Called before the transaction commits. An error rolls the transaction back.
    fn before_commit(
        &mut self,
        _ctx: &mut TransactionContext,
        _arena: &mut EntityArena,
        _read_only: bool,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// Called after the transaction committed or rolled back.
    fn after_completion(
        &mut self,
        _ctx: &mut TransactionContext,
        _arena: &mut EntityArena,
        _status: CompletionStatus,
    ) -> CoreResult<()> {
        Ok(())
    }
}
