//! Contracts of the collaborators the tracking layer orchestrates.
//!
//! The ORM engine, caches, event publication and delete-policy processing
//! are external concerns; the tracking layer only calls them at well-defined
//! points of the flush and commit protocol.

use crate::change::{ChangeRecord, EntityAttributeChanges, EntityChangedEvent};
use crate::entity::{Entity, EntityArena};
use crate::error::{CoreResult, EngineError};
use crate::scope::TxScope;
use crate::store::Query;
use crate::transaction::TransactionContext;
use crate::types::EntityHandle;
use std::collections::BTreeSet;

/// The ORM engine behind a datastore.
pub trait PersistenceEngine: Send + Sync {
    /// Writes pending changes of the given instances to the store.
    fn flush(
        &self,
        store: &str,
        instances: &BTreeSet<EntityHandle>,
        arena: &EntityArena,
    ) -> Result<(), EngineError>;

    /// Discards the engine's first-level cache for the store.
    fn clear(&self, store: &str);

    /// Executes a query and materializes the resulting instances into the arena.
    fn execute_query(
        &self,
        store: &str,
        query: &Query,
        arena: &mut EntityArena,
    ) -> Result<Vec<EntityHandle>, EngineError>;
}

/// Shared entity cache of the engine.
pub trait EntityCache: Send + Sync {
    /// Evicts the cached master copy of an instance, optionally narrowed to changed attributes.
    fn evict_master_entity(&self, entity: &Entity, changes: Option<&EntityAttributeChanges>);
}

/// Query result cache.
pub trait QueryCache: Send + Sync {
    /// Invalidates cached results that involve any of the given entity types.
    fn invalidate(&self, type_names: &BTreeSet<String>);
}

/// Collects and publishes entity changed events.
pub trait ChangeEventManager: Send + Sync {
    /// Builds the events for the tracked instances from the records classified so far.
    fn collect(
        &self,
        instances: &BTreeSet<EntityHandle>,
        records: &[ChangeRecord],
        arena: &EntityArena,
    ) -> Vec<EntityChangedEvent>;

    /// Publishes events inside the committing transaction.
    fn publish(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        events: &[EntityChangedEvent],
    ) -> CoreResult<()>;
}

/// Handler of published events running inside the committing transaction.
pub trait ChangeEventHandler: Send + Sync {
    /// Handles one event.
    fn handle(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        event: &EntityChangedEvent,
    ) -> CoreResult<()>;
}

impl<F> ChangeEventHandler for F
where
    F: Fn(&mut TransactionContext, &mut EntityArena, &EntityChangedEvent) -> CoreResult<()>
        + Send
        + Sync,
{
    fn handle(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        event: &EntityChangedEvent,
    ) -> CoreResult<()> {
        self(ctx, arena, event)
    }
}

/// Cascade processing of dependent instances when an instance is soft deleted.
///
/// A processor is used for exactly one instance.
pub trait DeletePolicyProcessor {
    /// Sets the deleted instance.
    fn set_entity(&mut self, entity: EntityHandle);

    /// Applies the delete policies.
    fn process(&mut self, scope: &mut TxScope<'_>) -> CoreResult<()>;
}

/// Creates a fresh [`DeletePolicyProcessor`] per deleted instance.
pub trait DeletePolicyProcessorFactory: Send + Sync {
    /// Creates a processor.
    fn create(&self) -> Box<dyn DeletePolicyProcessor>;
}

impl<F> DeletePolicyProcessorFactory for F
where
    F: Fn() -> Box<dyn DeletePolicyProcessor> + Send + Sync,
{
    fn create(&self) -> Box<dyn DeletePolicyProcessor> {
        self()
    }
}

/// Cache that holds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl EntityCache for NoopCache {
    fn evict_master_entity(&self, _entity: &Entity, _changes: Option<&EntityAttributeChanges>) {}
}

impl QueryCache for NoopCache {
    fn invalidate(&self, _type_names: &BTreeSet<String>) {}
}

/// Delete policy processor without policies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeletePolicy;

impl DeletePolicyProcessor for NoDeletePolicy {
    fn set_entity(&mut self, _entity: EntityHandle) {}

    fn process(&mut self, _scope: &mut TxScope<'_>) -> CoreResult<()> {
        Ok(())
    }
}

impl DeletePolicyProcessorFactory for NoDeletePolicy {
    fn create(&self) -> Box<dyn DeletePolicyProcessor> {
        Box::new(NoDeletePolicy)
    }
}
