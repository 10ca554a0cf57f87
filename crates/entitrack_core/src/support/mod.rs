//! Persistence support: the entry point of the tracking layer.
//!
//! [`PersistenceSupport`] owns the collaborators and drives:
//! - registration of instances into the transaction's registry
//! - explicit flushes with the flush-until-stable traversal
//! - detaching of single instances
//! - the registry synchronization that reconciles identity state on commit
//!   and rollback
//!
//! ```rust,ignore
//! let support = PersistenceSupport::builder(engine).build();
//! let manager = TransactionManager::new();
//!
//! let mut ctx = manager.begin(TransactionDefinition::default());
//! let session = ctx.entity_manager("main")?;
//! let order = arena.insert(Entity::new(order_type));
//! support.register_instance(&mut ctx, &mut arena, order, &session)?;
//! manager.commit(&mut ctx, &mut arena)?;
//! ```

mod classifier;
mod synchronization;

pub use classifier::ChangeClassifier;
pub use synchronization::RegistrySynchronization;

use crate::change::{ChangeFeed, ChangeRecord};
use crate::config::TrackerConfig;
use crate::contracts::{
    ChangeEventManager, DeletePolicyProcessorFactory, EntityCache, NoDeletePolicy, NoopCache,
    PersistenceEngine, QueryCache,
};
use crate::entity::EntityArena;
use crate::error::{CoreError, CoreResult};
use crate::listener::{
    AfterCompleteTransactionListener, BeforeCommitTransactionListener, DataStoreListener,
    EntityListenerManager, EntityListenerType,
};
use crate::registry::InstanceRegistry;
use crate::stats::TrackerStats;
use crate::transaction::TransactionContext;
use crate::traversal::{Traversal, TraversalReport};
use crate::types::{EntityHandle, SessionRef};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Orchestrates instance tracking, change classification and transaction reconciliation.
pub struct PersistenceSupport {
    config: TrackerConfig,
    engine: Arc<dyn PersistenceEngine>,
    listeners: Arc<EntityListenerManager>,
    entity_cache: Arc<dyn EntityCache>,
    query_cache: Arc<dyn QueryCache>,
    events: Arc<dyn ChangeEventManager>,
    delete_policy: Arc<dyn DeletePolicyProcessorFactory>,
    data_store_listeners: RwLock<Vec<Arc<dyn DataStoreListener>>>,
    before_commit_listeners: RwLock<Vec<Arc<dyn BeforeCommitTransactionListener>>>,
    after_complete_listeners: RwLock<Vec<Arc<dyn AfterCompleteTransactionListener>>>,
    stats: TrackerStats,
}

impl PersistenceSupport {
    /// Starts building a persistence support over an engine.
    pub fn builder(engine: Arc<dyn PersistenceEngine>) -> PersistenceSupportBuilder {
        PersistenceSupportBuilder::new(engine)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Returns the statistics.
    #[must_use]
    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn PersistenceEngine> {
        &self.engine
    }

    /// Returns the entity listener manager.
    #[must_use]
    pub fn listeners(&self) -> &Arc<EntityListenerManager> {
        &self.listeners
    }

    /// Adds a datastore listener.
    pub fn add_data_store_listener(&self, listener: Arc<dyn DataStoreListener>) {
        self.data_store_listeners.write().push(listener);
    }

    /// Adds a before-commit transaction listener, keeping listeners sorted by order.
    pub fn add_before_commit_listener(&self, listener: Arc<dyn BeforeCommitTransactionListener>) {
        let mut listeners = self.before_commit_listeners.write();
        listeners.push(listener);
        listeners.sort_by_key(|l| l.order());
    }

    /// Adds an after-complete transaction listener, keeping listeners sorted by order.
    pub fn add_after_complete_listener(&self, listener: Arc<dyn AfterCompleteTransactionListener>) {
        let mut listeners = self.after_complete_listeners.write();
        listeners.push(listener);
        listeners.sort_by_key(|l| l.order());
    }

    /// Returns the store name of a session, falling back to the default store.
    #[must_use]
    pub fn store_name(&self, session: &SessionRef) -> String {
        session.store_name(&self.config.default_store).to_string()
    }

    /// Binds the registry for a store to a just started transaction.
    pub fn register_synchronizations(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        store: &str,
    ) -> CoreResult<()> {
        trace!(store, txid = %ctx.id(), "register synchronizations");
        self.ensure_registry(ctx, store)
    }

    /// Makes sure the transaction has a registry for the store.
    ///
    /// The first call binds a new registry and, when synchronization is
    /// active, registers a [`RegistrySynchronization`] for it. A registry
    /// bound to another store is a fatal configuration error.
    pub fn ensure_registry(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        store: &str,
    ) -> CoreResult<()> {
        if !ctx.is_active() {
            return Err(CoreError::no_transaction());
        }
        match ctx.registry() {
            None => ctx.bind_registry(InstanceRegistry::new(store))?,
            Some(registry) if registry.store_name() != store => {
                return Err(CoreError::store_mismatch(store, registry.store_name()));
            }
            Some(_) => {}
        }

        let needs_synchronization = ctx.is_synchronization_active()
            && ctx
                .registry()
                .is_some_and(|registry| !registry.is_synchronized_with_transaction());
        if needs_synchronization {
            ctx.register_synchronization(Box::new(RegistrySynchronization::new(
                Arc::clone(self),
                store,
            )))?;
            if let Some(registry) = ctx.registry_mut() {
                registry.set_synchronized_with_transaction(true);
            }
        }
        Ok(())
    }

    /// Registers an instance with a unit of work of the active transaction.
    pub fn register_instance(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        entity: EntityHandle,
        session: &SessionRef,
    ) -> CoreResult<()> {
        if !ctx.is_active() {
            return Err(CoreError::no_transaction());
        }
        self.register(ctx, arena, entity, session)
    }

    /// Registers an instance produced by lazy loading.
    ///
    /// Lazy loading may happen outside a transaction; the instance is then
    /// not tracked.
    pub fn register_loaded_instance(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        entity: EntityHandle,
        session: &SessionRef,
    ) -> CoreResult<()> {
        if !ctx.is_active() {
            return Ok(());
        }
        self.register(ctx, arena, entity, session)
    }

    fn register(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        entity: EntityHandle,
        session: &SessionRef,
    ) -> CoreResult<()> {
        if !session.is_unit_of_work() {
            return Err(CoreError::NotUnitOfWork {
                session: session.id,
            });
        }
        let store = self.store_name(session);
        self.ensure_registry(ctx, &store)?;
        let registry = ctx.registry_mut().ok_or_else(CoreError::no_transaction)?;
        registry.register(entity, arena.entity_mut(entity)?, session);
        Ok(())
    }

    /// Returns the instances registered with a unit of work.
    pub fn instances(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        session: &SessionRef,
    ) -> CoreResult<BTreeSet<EntityHandle>> {
        if !ctx.is_active() {
            return Err(CoreError::no_transaction());
        }
        self.ensure_registry(ctx, &self.store_name(session))?;
        Ok(ctx
            .registry()
            .map(|registry| registry.instances(session.id))
            .unwrap_or_default())
    }

    /// Returns the instances saved by flushes of the active transaction.
    pub fn saved_instances(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        store: &str,
    ) -> CoreResult<BTreeSet<EntityHandle>> {
        if !ctx.is_active() {
            return Err(CoreError::no_transaction());
        }
        self.ensure_registry(ctx, store)?;
        Ok(ctx
            .registry()
            .map(|registry| registry.saved_instances().clone())
            .unwrap_or_default())
    }

    /// Classifies every registered instance until no further change surfaces.
    pub fn traverse(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        warn_about_implicit_flush: bool,
    ) -> CoreResult<TraversalReport> {
        let traversal =
            Traversal::new(&self.config).warn_about_implicit_flush(warn_about_implicit_flush);
        let mut scope = ctx.scope(arena)?;
        let mut classifier = ChangeClassifier::new(self);
        let report = match traversal.run(&mut scope, &mut classifier) {
            Ok(report) => report,
            Err(err) => {
                self.stats.record_error();
                return Err(err);
            }
        };
        self.stats.record_traversal(report.rounds, report.visited);
        Ok(report)
    }

    /// Flushes pending changes of the active transaction to the store.
    ///
    /// Instances classified as inserted are remembered as saved so that a
    /// later traversal in the same transaction does not insert them again.
    ///
    /// A read-only transaction is never flushed: pending changes stay on the
    /// instances so that commit reports them as a read-only violation.
    pub fn process_flush(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        store: &str,
        warn_about_implicit_flush: bool,
    ) -> CoreResult<TraversalReport> {
        self.ensure_registry(ctx, store)?;
        if ctx.is_read_only() {
            trace!(store, txid = %ctx.id(), "skipping flush of read-only transaction");
            return Ok(TraversalReport::default());
        }
        let report = self.traverse(ctx, arena, warn_about_implicit_flush)?;
        self.fire_flush(store)?;

        let registry = ctx.registry_mut().ok_or_else(CoreError::no_transaction)?;
        let instances = registry.all_instances();
        self.engine.flush(store, &instances, arena)?;
        for &handle in &instances {
            let Some(entity) = arena.get_mut(handle) else {
                continue;
            };
            if entity.state().is_new() {
                registry.mark_saved(handle);
            }
            if let Some(listener) = entity.change_listener_mut() {
                listener.reset();
            }
        }
        self.stats.record_flush();
        Ok(report)
    }

    /// Detaches one instance from its unit of work before the transaction ends.
    pub fn detach(
        self: &Arc<Self>,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        session: &SessionRef,
        entity: EntityHandle,
    ) -> CoreResult<()> {
        self.ensure_registry(ctx, &self.store_name(session))?;
        self.fire_before_detach(ctx, arena, entity)?;

        let registry = ctx.registry_mut().ok_or_else(CoreError::no_transaction)?;
        registry.unregister(entity, arena.entity(entity)?, session.id)?;
        arena.entity_mut(entity)?.make_detached();
        Ok(())
    }

    /// Fires before-detach listeners unless the instance is already detached.
    pub fn fire_before_detach(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        entity: EntityHandle,
    ) -> CoreResult<()> {
        if arena.entity(entity)?.state().is_detached() {
            return Ok(());
        }
        let mut scope = ctx.scope(arena)?;
        self.listeners
            .fire_listener(&mut scope, entity, EntityListenerType::BeforeDetach)
    }

    /// Notifies datastore listeners of a flush.
    pub fn fire_flush(&self, store: &str) -> CoreResult<()> {
        let listeners: Vec<_> = self.data_store_listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_flush(store)?;
        }
        Ok(())
    }

    /// Notifies datastore listeners of a classified change.
    pub fn fire_entity_change(&self, store: &str, record: &ChangeRecord) -> CoreResult<()> {
        let listeners: Vec<_> = self.data_store_listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_entity_change(store, record)?;
        }
        Ok(())
    }

    fn before_commit_listeners(&self) -> Vec<Arc<dyn BeforeCommitTransactionListener>> {
        self.before_commit_listeners.read().clone()
    }

    fn after_complete_listeners(&self) -> Vec<Arc<dyn AfterCompleteTransactionListener>> {
        self.after_complete_listeners.read().clone()
    }
}

impl fmt::Debug for PersistenceSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceSupport")
            .field("config", &self.config)
            .field("listeners", &self.listeners)
            .field("data_store_listeners", &self.data_store_listeners.read().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`PersistenceSupport`].
pub struct PersistenceSupportBuilder {
    config: TrackerConfig,
    engine: Arc<dyn PersistenceEngine>,
    listeners: Arc<EntityListenerManager>,
    entity_cache: Arc<dyn EntityCache>,
    query_cache: Arc<dyn QueryCache>,
    events: Arc<dyn ChangeEventManager>,
    delete_policy: Arc<dyn DeletePolicyProcessorFactory>,
}

impl PersistenceSupportBuilder {
    fn new(engine: Arc<dyn PersistenceEngine>) -> Self {
        Self {
            config: TrackerConfig::default(),
            engine,
            listeners: Arc::new(EntityListenerManager::new()),
            entity_cache: Arc::new(NoopCache),
            query_cache: Arc::new(NoopCache),
            events: Arc::new(ChangeFeed::new()),
            delete_policy: Arc::new(NoDeletePolicy),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the entity listener manager.
    #[must_use]
    pub fn listeners(mut self, listeners: Arc<EntityListenerManager>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Sets the entity cache.
    #[must_use]
    pub fn entity_cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.entity_cache = cache;
        self
    }

    /// Sets the query cache.
    #[must_use]
    pub fn query_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.query_cache = cache;
        self
    }

    /// Sets the change event manager.
    #[must_use]
    pub fn change_events(mut self, events: Arc<dyn ChangeEventManager>) -> Self {
        self.events = events;
        self
    }

    /// Sets the delete policy processor factory.
    #[must_use]
    pub fn delete_policy(mut self, factory: Arc<dyn DeletePolicyProcessorFactory>) -> Self {
        self.delete_policy = factory;
        self
    }

    /// Builds the persistence support.
    pub fn build(self) -> Arc<PersistenceSupport> {
        Arc::new(PersistenceSupport {
            config: self.config,
            engine: self.engine,
            listeners: self.listeners,
            entity_cache: self.entity_cache,
            query_cache: self.query_cache,
            events: self.events,
            delete_policy: self.delete_policy,
            data_store_listeners: RwLock::new(Vec::new()),
            before_commit_listeners: RwLock::new(Vec::new()),
            after_complete_listeners: RwLock::new(Vec::new()),
            stats: TrackerStats::new(),
        })
    }
}
