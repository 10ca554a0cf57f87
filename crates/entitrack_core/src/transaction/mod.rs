//! Explicit transaction context and synchronization callbacks.
//!
//! A transaction is an explicit [`TransactionContext`] value handed to every
//! operation that needs it. The context owns:
//! - the units of work opened per datastore
//! - the instance registry bound to the transaction
//! - the synchronizations called back on commit and completion
//!
//! [`TransactionManager`] drives the two-phase completion protocol: every
//! synchronization gets `before_commit`, then `after_completion` with the
//! final outcome.

mod context;
mod manager;
mod state;
mod synchronization;

pub use context::TransactionContext;
pub use manager::TransactionManager;
pub use state::{CompletionStatus, TransactionDefinition, TransactionState};
pub use synchronization::{TransactionSynchronization, LOWEST_PRECEDENCE};
