//! Transaction-scoped registry of managed instances.

use crate::change::ChangeRecord;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntityHandle, SessionId, SessionRef};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::trace;

/// Registry of the instances a transaction manages for one datastore.
///
/// One registry is bound per transaction. It groups instances by the unit of
/// work they were registered with and remembers:
/// - instances already saved by an intermediate flush
/// - new instances detached before the transaction ended, so a rollback can
///   restore their `new` flag
/// - the change records classified so far
///
/// Everything is released when the transaction completes.
#[derive(Default)]
pub struct InstanceRegistry {
    store_name: String,
    sessions: BTreeMap<SessionId, BTreeSet<EntityHandle>>,
    saved: BTreeSet<EntityHandle>,
    new_detached: BTreeSet<EntityHandle>,
    changes: Vec<ChangeRecord>,
    synchronized_with_transaction: bool,
}

impl InstanceRegistry {
    /// Creates an empty registry for a datastore.
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            ..Self::default()
        }
    }

    /// Returns the datastore this registry serves.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Returns true once a synchronization has been registered for this registry.
    #[must_use]
    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.synchronized_with_transaction
    }

    /// Marks the registry as synchronized with its transaction.
    pub fn set_synchronized_with_transaction(&mut self, value: bool) {
        self.synchronized_with_transaction = value;
    }

    /// Registers an instance with a unit of work and makes it managed.
    pub fn register(&mut self, handle: EntityHandle, entity: &mut Entity, session: &SessionRef) {
        trace!(
            entity = %handle,
            session = %session.id,
            store = %self.store_name,
            "registering instance for unit of work"
        );

        let state = entity.state_mut();
        state.set_managed(true);
        state.set_detached(false);
        entity.attach_change_listener();
        entity.set_session(Some(session.id));

        self.sessions.entry(session.id).or_default().insert(handle);
    }

    /// Removes an instance from a unit of work.
    ///
    /// A new instance is remembered so that a rollback restores it as new.
    pub fn unregister(
        &mut self,
        handle: EntityHandle,
        entity: &Entity,
        session: SessionId,
    ) -> CoreResult<()> {
        let removed = self
            .sessions
            .get_mut(&session)
            .is_some_and(|instances| instances.remove(&handle));
        if !removed {
            return Err(CoreError::NotRegistered {
                entity: handle,
                session,
            });
        }
        if entity.state().is_new() {
            self.new_detached.insert(handle);
        }
        Ok(())
    }

    /// Returns the instances registered with one unit of work.
    #[must_use]
    pub fn instances(&self, session: SessionId) -> BTreeSet<EntityHandle> {
        self.sessions.get(&session).cloned().unwrap_or_default()
    }

    /// Returns the instances of all units of work.
    #[must_use]
    pub fn all_instances(&self) -> BTreeSet<EntityHandle> {
        self.sessions.values().flatten().copied().collect()
    }

    /// Returns true if the instance is registered with any unit of work.
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.sessions.values().any(|instances| instances.contains(&handle))
    }

    /// Records that an instance was written by a flush in this transaction.
    pub fn mark_saved(&mut self, handle: EntityHandle) {
        self.saved.insert(handle);
    }

    /// Returns true if the instance was written by a flush in this transaction.
    #[must_use]
    pub fn is_saved(&self, handle: EntityHandle) -> bool {
        self.saved.contains(&handle)
    }

    /// Returns the instances written by flushes in this transaction.
    #[must_use]
    pub fn saved_instances(&self) -> &BTreeSet<EntityHandle> {
        &self.saved
    }

    /// Remembers a new instance that is being detached.
    pub fn remember_new_detached(&mut self, handle: EntityHandle) {
        self.new_detached.insert(handle);
    }

    /// Returns the new instances detached during the transaction.
    #[must_use]
    pub fn new_detached_instances(&self) -> &BTreeSet<EntityHandle> {
        &self.new_detached
    }

    /// Appends a classified change.
    pub fn record_change(&mut self, record: ChangeRecord) {
        self.changes.push(record);
    }

    /// Returns the changes classified since the transaction started.
    #[must_use]
    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    /// Releases every tracked instance and record.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.saved.clear();
        self.new_detached.clear();
        self.changes.clear();
    }
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("store_name", &self.store_name)
            .field("instances", &self.all_instances().len())
            .field("saved", &self.saved.len())
            .field("new_detached", &self.new_detached.len())
            .finish()
    }
}
