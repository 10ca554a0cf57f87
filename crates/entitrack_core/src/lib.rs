//! # EntiTrack Core
//!
//! Transactional entity-state tracking and change detection.
//!
//! This crate provides:
//! - Per-instance identity state (new, managed, detached, removed)
//! - A transaction-scoped registry of managed instances per datastore
//! - The flush-until-stable traversal that classifies every instance
//!   dirtied as a side effect of lifecycle listeners
//! - Commit and rollback reconciliation of identity state
//! - Collection and publication of entity changed events
//!
//! ## Architecture
//!
//! Instances live in an [`EntityArena`] and are referred to by stable
//! [`EntityHandle`]s. A transaction is an explicit [`TransactionContext`]
//! holding the [`InstanceRegistry`] for its datastore. On commit the
//! [`RegistrySynchronization`] runs the traversal, detaches every instance and
//! publishes the classified changes.
//!
//! ## Key Invariants
//!
//! - A registry serves exactly one datastore for its whole life
//! - The `new` flag of an instance is cleared only by a successful commit
//! - A rolled back transaction leaves new instances it detached new again
//! - The registry is released whatever the outcome of the transaction
//! - Read-only transactions never publish events and fail on any change

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod config;
mod contracts;
mod entity;
mod error;
mod listener;
mod registry;
mod scope;
mod stats;
mod store;
mod support;
mod transaction;
mod traversal;
mod types;

pub use change::{
    ChangeFeed, ChangeRecord, ChangeType, EntityAttributeChanges, EntityChangedEvent,
    SequencedEvent,
};
pub use config::{DataStoreConfig, TrackerConfig, DEFAULT_SYNCHRONIZATION_ORDER};
pub use contracts::{
    ChangeEventHandler, ChangeEventManager, DeletePolicyProcessor, DeletePolicyProcessorFactory,
    EntityCache, NoDeletePolicy, NoopCache, PersistenceEngine, QueryCache,
};
pub use entity::{
    AttributeChange, AttributeChangeListener, Capabilities, Entity, EntityArena, EntityId,
    EntityState, EntityType, EntityTypeBuilder, FetchGroup, FetchGroupKind, SoftDeletion,
};
pub use error::{CoreError, CoreResult, EngineError, EngineErrorKind, FETCH_GROUP_ON_REPORT_QUERY};
pub use listener::{
    listener_fn, AfterCompleteTransactionListener, BeforeCommitTransactionListener,
    DataStoreListener, EntityListener, EntityListenerManager, EntityListenerType,
};
pub use registry::InstanceRegistry;
pub use scope::TxScope;
pub use stats::{StatsSnapshot, TrackerStats};
pub use store::{JpaDataStore, Query, SaveContext, SaveResult, LOAD_TX_PREFIX, SAVE_TX_PREFIX};
pub use support::{
    ChangeClassifier, PersistenceSupport, PersistenceSupportBuilder, RegistrySynchronization,
};
pub use transaction::{
    CompletionStatus, TransactionContext, TransactionDefinition, TransactionManager,
    TransactionState, TransactionSynchronization, LOWEST_PRECEDENCE,
};
pub use traversal::{EntityVisitor, Traversal, TraversalReport, IMPLICIT_FLUSH_TARGET};
pub use types::{EntityHandle, SessionId, SessionKind, SessionRef, TransactionId, MAIN_STORE};
