//! Test environment wiring the tracking layer to in-memory collaborators.

use crate::engine::InMemoryEngine;
use crate::fakes::{CountingDeletePolicy, RecordingEntityCache, RecordingQueryCache};
use crate::fixtures::all_types;
use entitrack_core::{
    ChangeFeed, CoreResult, DataStoreConfig, Entity, EntityArena, EntityChangedEvent,
    EntityHandle, EntityListenerManager, JpaDataStore, PersistenceSupport, TrackerConfig,
    TransactionContext, TransactionDefinition, TransactionManager, TraversalReport, MAIN_STORE,
};
use std::sync::Arc;

/// Persistence support over an [`InMemoryEngine`] with recording collaborators.
pub struct TestEnv {
    /// The engine.
    pub engine: Arc<InMemoryEngine>,
    /// The persistence support under test.
    pub support: Arc<PersistenceSupport>,
    /// Transaction manager.
    pub transactions: Arc<TransactionManager>,
    /// Published events.
    pub feed: Arc<ChangeFeed>,
    /// Entity cache evictions.
    pub entity_cache: Arc<RecordingEntityCache>,
    /// Query cache invalidations.
    pub query_cache: Arc<RecordingQueryCache>,
    /// Delete policy processing.
    pub delete_policy: CountingDeletePolicy,
    /// Instances.
    pub arena: EntityArena,
}

impl TestEnv {
    /// Creates an environment with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Creates an environment with a configuration.
    pub fn with_config(config: TrackerConfig) -> Self {
        crate::init_tracing();

        let engine = Arc::new(InMemoryEngine::new(all_types()));
        let feed = Arc::new(ChangeFeed::new());
        let entity_cache = Arc::new(RecordingEntityCache::default());
        let query_cache = Arc::new(RecordingQueryCache::default());
        let delete_policy = CountingDeletePolicy::default();

        let support = PersistenceSupport::builder(engine.clone())
            .config(config)
            .entity_cache(entity_cache.clone())
            .query_cache(query_cache.clone())
            .change_events(feed.clone())
            .delete_policy(Arc::new(delete_policy.clone()))
            .build();

        Self {
            engine,
            support,
            transactions: Arc::new(TransactionManager::new()),
            feed,
            entity_cache,
            query_cache,
            delete_policy,
            arena: EntityArena::new(),
        }
    }

    /// Returns the entity listener manager.
    pub fn listeners(&self) -> &Arc<EntityListenerManager> {
        self.support.listeners()
    }

    /// Begins a read-write transaction.
    pub fn begin(&self) -> TransactionContext {
        self.transactions.begin(TransactionDefinition::default())
    }

    /// Begins a read-only transaction.
    pub fn begin_read_only(&self) -> TransactionContext {
        self.transactions
            .begin(TransactionDefinition::default().read_only(true))
    }

    /// Stores an instance in the arena and registers it with the main unit of work.
    pub fn persist(&mut self, ctx: &mut TransactionContext, entity: Entity) -> CoreResult<EntityHandle> {
        self.persist_in(ctx, MAIN_STORE, entity)
    }

    /// Stores an instance in the arena and registers it with a store's unit of work.
    pub fn persist_in(
        &mut self,
        ctx: &mut TransactionContext,
        store: &str,
        entity: Entity,
    ) -> CoreResult<EntityHandle> {
        let handle = self.arena.insert(entity);
        self.register_in(ctx, store, handle)?;
        Ok(handle)
    }

    /// Registers an arena instance with the main unit of work.
    pub fn register(&mut self, ctx: &mut TransactionContext, handle: EntityHandle) -> CoreResult<()> {
        self.register_in(ctx, MAIN_STORE, handle)
    }

    /// Registers an arena instance with a store's unit of work.
    pub fn register_in(
        &mut self,
        ctx: &mut TransactionContext,
        store: &str,
        handle: EntityHandle,
    ) -> CoreResult<()> {
        let session = ctx.entity_manager(store)?;
        self.support
            .register_instance(ctx, &mut self.arena, handle, &session)
    }

    /// Detaches one instance from the main unit of work.
    pub fn detach(&mut self, ctx: &mut TransactionContext, handle: EntityHandle) -> CoreResult<()> {
        let session = ctx.entity_manager(MAIN_STORE)?;
        self.support.detach(ctx, &mut self.arena, &session, handle)
    }

    /// Flushes the main store.
    pub fn flush(&mut self, ctx: &mut TransactionContext) -> CoreResult<TraversalReport> {
        self.support
            .process_flush(ctx, &mut self.arena, MAIN_STORE, false)
    }

    /// Commits a transaction.
    pub fn commit(&mut self, ctx: &mut TransactionContext) -> CoreResult<()> {
        self.transactions.commit(ctx, &mut self.arena)
    }

    /// Rolls a transaction back.
    pub fn rollback(&mut self, ctx: &mut TransactionContext) -> CoreResult<()> {
        self.transactions.rollback(ctx, &mut self.arena)
    }

    /// Returns a data store over the main store.
    pub fn data_store(&self, config: DataStoreConfig) -> JpaDataStore {
        JpaDataStore::new(
            MAIN_STORE,
            config,
            Arc::clone(&self.support),
            Arc::clone(&self.transactions),
        )
    }

    /// Returns every event published so far.
    pub fn published(&self) -> Vec<EntityChangedEvent> {
        self.feed
            .poll(0, usize::MAX)
            .into_iter()
            .map(|sequenced| sequenced.event)
            .collect()
    }

    /// Returns an instance.
    pub fn entity(&self, handle: EntityHandle) -> &Entity {
        self.arena.get(handle).expect("entity not in arena")
    }

    /// Returns an instance for modification.
    pub fn entity_mut(&mut self, handle: EntityHandle) -> &mut Entity {
        self.arena.get_mut(handle).expect("entity not in arena")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
