//! Recording fakes of the tracking layer's collaborators.

use entitrack_core::{
    AfterCompleteTransactionListener, BeforeCommitTransactionListener, ChangeEventHandler,
    ChangeRecord, CoreError, CoreResult, DataStoreListener, DeletePolicyProcessor,
    DeletePolicyProcessorFactory, Entity, EntityArena, EntityAttributeChanges,
    EntityChangedEvent, EntityCache, EntityHandle, EntityId, EntityListener, EntityListenerType,
    QueryCache, TransactionContext, TxScope,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One eviction from the entity cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Eviction {
    /// Evicted instance.
    pub id: EntityId,
    /// Attributes named by the eviction, `None` for whole-instance evictions.
    pub attributes: Option<Vec<String>>,
}

/// Entity cache remembering every eviction.
#[derive(Debug, Default)]
pub struct RecordingEntityCache {
    evictions: Mutex<Vec<Eviction>>,
}

impl RecordingEntityCache {
    /// Returns all evictions.
    pub fn evictions(&self) -> Vec<Eviction> {
        self.evictions.lock().clone()
    }

    /// Returns the number of evictions of one instance.
    pub fn eviction_count(&self, id: EntityId) -> usize {
        self.evictions.lock().iter().filter(|e| e.id == id).count()
    }
}

impl EntityCache for RecordingEntityCache {
    fn evict_master_entity(&self, entity: &Entity, changes: Option<&EntityAttributeChanges>) {
        self.evictions.lock().push(Eviction {
            id: entity.id(),
            attributes: changes.map(|c| c.attributes().map(str::to_string).collect()),
        });
    }
}

/// Query cache remembering invalidated type names.
#[derive(Debug, Default)]
pub struct RecordingQueryCache {
    invalidations: Mutex<Vec<BTreeSet<String>>>,
}

impl RecordingQueryCache {
    /// Returns every invalidation call.
    pub fn invalidations(&self) -> Vec<BTreeSet<String>> {
        self.invalidations.lock().clone()
    }
}

impl QueryCache for RecordingQueryCache {
    fn invalidate(&self, type_names: &BTreeSet<String>) {
        self.invalidations.lock().push(type_names.clone());
    }
}

/// Entity listener remembering every event it received.
#[derive(Debug, Default)]
pub struct RecordingEntityListener {
    fired: Mutex<Vec<(EntityHandle, EntityListenerType)>>,
}

impl RecordingEntityListener {
    /// Returns every received event, in order.
    pub fn fired(&self) -> Vec<(EntityHandle, EntityListenerType)> {
        self.fired.lock().clone()
    }

    /// Returns how often an event kind was received.
    pub fn count(&self, kind: EntityListenerType) -> usize {
        self.fired.lock().iter().filter(|(_, k)| *k == kind).count()
    }

    /// Returns how often an event kind was received for one instance.
    pub fn count_for(&self, entity: EntityHandle, kind: EntityListenerType) -> usize {
        self.fired
            .lock()
            .iter()
            .filter(|(e, k)| *e == entity && *k == kind)
            .count()
    }
}

impl EntityListener for RecordingEntityListener {
    fn on_event(
        &self,
        _scope: &mut TxScope<'_>,
        entity: EntityHandle,
        kind: EntityListenerType,
    ) -> CoreResult<()> {
        self.fired.lock().push((entity, kind));
        Ok(())
    }
}

/// Datastore listener remembering flushes and classified changes.
#[derive(Debug, Default)]
pub struct RecordingDataStoreListener {
    flushes: Mutex<Vec<String>>,
    changes: Mutex<Vec<ChangeRecord>>,
}

impl RecordingDataStoreListener {
    /// Returns the stores flushed, in order.
    pub fn flushes(&self) -> Vec<String> {
        self.flushes.lock().clone()
    }

    /// Returns the classified changes, in order.
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.changes.lock().clone()
    }
}

impl DataStoreListener for RecordingDataStoreListener {
    fn on_flush(&self, store: &str) -> CoreResult<()> {
        self.flushes.lock().push(store.to_string());
        Ok(())
    }

    fn on_entity_change(&self, _store: &str, record: &ChangeRecord) -> CoreResult<()> {
        self.changes.lock().push(record.clone());
        Ok(())
    }
}

/// Shared, ordered log of listener invocations.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Creates an empty journal.
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Transaction listener writing `<name>:before-commit` and
/// `<name>:after-complete:<committed>` entries into a journal.
#[derive(Debug)]
pub struct JournalTransactionListener {
    name: String,
    order: i32,
    journal: Journal,
    fail_before_commit: bool,
    fail_after_complete: bool,
}

impl JournalTransactionListener {
    /// Creates a listener.
    pub fn new(name: impl Into<String>, order: i32, journal: Journal) -> Self {
        Self {
            name: name.into(),
            order,
            journal,
            fail_before_commit: false,
            fail_after_complete: false,
        }
    }

    /// Makes `before_commit` fail.
    #[must_use]
    pub fn failing_before_commit(mut self) -> Self {
        self.fail_before_commit = true;
        self
    }

    /// Makes `after_complete` fail.
    #[must_use]
    pub fn failing_after_complete(mut self) -> Self {
        self.fail_after_complete = true;
        self
    }
}

impl BeforeCommitTransactionListener for JournalTransactionListener {
    fn order(&self) -> i32 {
        self.order
    }

    fn before_commit(
        &self,
        _store: &str,
        instances: &BTreeSet<EntityHandle>,
        _arena: &mut EntityArena,
    ) -> CoreResult<()> {
        self.journal
            .lock()
            .push(format!("{}:before-commit:{}", self.name, instances.len()));
        if self.fail_before_commit {
            return Err(CoreError::listener(format!("{} refused commit", self.name)));
        }
        Ok(())
    }
}

impl AfterCompleteTransactionListener for JournalTransactionListener {
    fn order(&self) -> i32 {
        self.order
    }

    fn after_complete(
        &self,
        committed: bool,
        _instances: &BTreeSet<EntityHandle>,
        _arena: &EntityArena,
    ) -> CoreResult<()> {
        self.journal
            .lock()
            .push(format!("{}:after-complete:{committed}", self.name));
        if self.fail_after_complete {
            return Err(CoreError::listener(format!("{} failed after completion", self.name)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DeletePolicyLog {
    created: usize,
    processed: Vec<EntityHandle>,
}

/// Delete policy factory counting processors and the instances they processed.
#[derive(Debug, Default, Clone)]
pub struct CountingDeletePolicy {
    log: Arc<Mutex<DeletePolicyLog>>,
}

impl CountingDeletePolicy {
    /// Returns the number of processors created.
    pub fn created(&self) -> usize {
        self.log.lock().created
    }

    /// Returns the processed instances, in order.
    pub fn processed(&self) -> Vec<EntityHandle> {
        self.log.lock().processed.clone()
    }
}

impl DeletePolicyProcessorFactory for CountingDeletePolicy {
    fn create(&self) -> Box<dyn DeletePolicyProcessor> {
        self.log.lock().created += 1;
        Box::new(CountingProcessor {
            log: Arc::clone(&self.log),
            entity: None,
        })
    }
}

struct CountingProcessor {
    log: Arc<Mutex<DeletePolicyLog>>,
    entity: Option<EntityHandle>,
}

impl DeletePolicyProcessor for CountingProcessor {
    fn set_entity(&mut self, entity: EntityHandle) {
        self.entity = Some(entity);
    }

    fn process(&mut self, _scope: &mut TxScope<'_>) -> CoreResult<()> {
        let entity = self
            .entity
            .take()
            .ok_or_else(|| CoreError::invalid_operation("delete policy processor has no entity"))?;
        self.log.lock().processed.push(entity);
        Ok(())
    }
}

/// In-transaction event handler remembering handled events.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<EntityChangedEvent>>,
}

impl RecordingEventHandler {
    /// Returns handled events.
    pub fn events(&self) -> Vec<EntityChangedEvent> {
        self.events.lock().clone()
    }
}

impl ChangeEventHandler for RecordingEventHandler {
    fn handle(
        &self,
        _ctx: &mut TransactionContext,
        _arena: &mut EntityArena,
        event: &EntityChangedEvent,
    ) -> CoreResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
