//! Lifecycle listener dispatch.
//!
//! Entity listeners fire synchronously in registration order. Later
//! listeners observe attribute changes made by earlier ones, which the
//! classifier relies on when it merges pre- and post-listener deltas.

use crate::change::ChangeRecord;
use crate::entity::EntityArena;
use crate::error::CoreResult;
use crate::scope::TxScope;
use crate::types::EntityHandle;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Kind of entity lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityListenerType {
    /// Fired before a new instance is inserted.
    BeforeInsert,
    /// Fired before a changed instance is updated.
    BeforeUpdate,
    /// Fired before an instance is deleted.
    BeforeDelete,
    /// Fired before an instance leaves its unit of work.
    BeforeDetach,
}

/// Listener of entity lifecycle events.
///
/// Listeners may modify the instance, other instances, or persist new ones
/// through the scope; the traversal picks those side effects up.
pub trait EntityListener: Send + Sync {
    /// Handles an event for one instance.
    fn on_event(
        &self,
        scope: &mut TxScope<'_>,
        entity: EntityHandle,
        kind: EntityListenerType,
    ) -> CoreResult<()>;
}

impl<F> EntityListener for F
where
    F: Fn(&mut TxScope<'_>, EntityHandle, EntityListenerType) -> CoreResult<()> + Send + Sync,
{
    fn on_event(
        &self,
        scope: &mut TxScope<'_>,
        entity: EntityHandle,
        kind: EntityListenerType,
    ) -> CoreResult<()> {
        self(scope, entity, kind)
    }
}

/// Wraps a closure into a shareable [`EntityListener`].
pub fn listener_fn<F>(f: F) -> Arc<dyn EntityListener>
where
    F: Fn(&mut TxScope<'_>, EntityHandle, EntityListenerType) -> CoreResult<()>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

struct Registration {
    kind: EntityListenerType,
    entity_name: Option<String>,
    listener: Arc<dyn EntityListener>,
}

/// Ordered registry and dispatcher of entity listeners.
#[derive(Default)]
pub struct EntityListenerManager {
    registrations: RwLock<Vec<Registration>>,
    disabled: RwLock<HashSet<String>>,
}

impl EntityListenerManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for one event kind of every entity type.
    pub fn add_listener(&self, kind: EntityListenerType, listener: Arc<dyn EntityListener>) {
        self.registrations.write().push(Registration {
            kind,
            entity_name: None,
            listener,
        });
    }

    /// Adds a listener for one event kind of one entity type.
    pub fn add_entity_listener(
        &self,
        entity_name: impl Into<String>,
        kind: EntityListenerType,
        listener: Arc<dyn EntityListener>,
    ) {
        self.registrations.write().push(Registration {
            kind,
            entity_name: Some(entity_name.into()),
            listener,
        });
    }

    /// Suppresses all listeners of an entity type until re-enabled.
    pub fn disable_listeners(&self, entity_name: impl Into<String>) {
        self.disabled.write().insert(entity_name.into());
    }

    /// Re-enables listeners of an entity type.
    pub fn enable_listeners(&self, entity_name: &str) {
        self.disabled.write().remove(entity_name);
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Fires every listener registered for the event and the instance's type.
    pub fn fire_listener(
        &self,
        scope: &mut TxScope<'_>,
        entity: EntityHandle,
        kind: EntityListenerType,
    ) -> CoreResult<()> {
        let entity_name = scope.entity(entity)?.type_name().to_string();
        if self.disabled.read().contains(&entity_name) {
            return Ok(());
        }

        // Listeners may register further listeners; dispatch over a snapshot.
        let listeners: Vec<Arc<dyn EntityListener>> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| r.entity_name.as_deref().map_or(true, |n| n == entity_name))
            .map(|r| Arc::clone(&r.listener))
            .collect();

        if listeners.is_empty() {
            return Ok(());
        }
        trace!(
            entity = %entity,
            entity_name = %entity_name,
            ?kind,
            store = %scope.store_name(),
            count = listeners.len(),
            "firing entity listeners"
        );
        for listener in listeners {
            listener.on_event(scope, entity, kind)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EntityListenerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityListenerManager")
            .field("listeners", &self.len())
            .finish_non_exhaustive()
    }
}

/// Listener of datastore-level flush and change notifications.
pub trait DataStoreListener: Send + Sync {
    /// Called after a traversal, before changes are written to the store.
    fn on_flush(&self, _store: &str) -> CoreResult<()> {
        Ok(())
    }

    /// Called for every classified change.
    fn on_entity_change(&self, _store: &str, _record: &ChangeRecord) -> CoreResult<()> {
        Ok(())
    }
}

/// Listener invoked with every tracked instance before a read-write transaction commits.
pub trait BeforeCommitTransactionListener: Send + Sync {
    /// Returns the position among other listeners.
    fn order(&self) -> i32 {
        0
    }

    /// Called before commit. Returning an error rolls the transaction back.
    fn before_commit(
        &self,
        store: &str,
        instances: &BTreeSet<EntityHandle>,
        arena: &mut EntityArena,
    ) -> CoreResult<()>;
}

/// Listener invoked with every tracked instance after a transaction completed.
pub trait AfterCompleteTransactionListener: Send + Sync {
    /// Returns the position among other listeners.
    fn order(&self) -> i32 {
        0
    }

    /// Called after completion with the outcome.
    fn after_complete(
        &self,
        committed: bool,
        instances: &BTreeSet<EntityHandle>,
        arena: &EntityArena,
    ) -> CoreResult<()>;
}
