//! Mutable view of one transaction's tracked state.

use crate::entity::{Entity, EntityArena};
use crate::error::CoreResult;
use crate::registry::InstanceRegistry;
use crate::types::{EntityHandle, SessionRef};

/// Everything a listener, visitor or delete policy may touch while a
/// transaction is flushing: the instances, the registry of the transaction
/// and the unit of work new instances are persisted into.
pub struct TxScope<'a> {
    arena: &'a mut EntityArena,
    registry: &'a mut InstanceRegistry,
    session: SessionRef,
}

impl<'a> TxScope<'a> {
    /// Creates a scope.
    pub fn new(
        arena: &'a mut EntityArena,
        registry: &'a mut InstanceRegistry,
        session: SessionRef,
    ) -> Self {
        Self {
            arena,
            registry,
            session,
        }
    }

    /// Returns the datastore name of the registry.
    #[must_use]
    pub fn store_name(&self) -> &str {
        self.registry.store_name()
    }

    /// Returns the unit of work of the scope.
    #[must_use]
    pub fn session(&self) -> &SessionRef {
        &self.session
    }

    /// Returns the instances.
    #[must_use]
    pub fn arena(&self) -> &EntityArena {
        self.arena
    }

    /// Returns the instances for modification.
    pub fn arena_mut(&mut self) -> &mut EntityArena {
        self.arena
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &InstanceRegistry {
        self.registry
    }

    /// Returns the registry for modification.
    pub fn registry_mut(&mut self) -> &mut InstanceRegistry {
        self.registry
    }

    /// Returns an instance.
    pub fn entity(&self, handle: EntityHandle) -> CoreResult<&Entity> {
        self.arena.entity(handle)
    }

    /// Returns an instance for modification.
    pub fn entity_mut(&mut self, handle: EntityHandle) -> CoreResult<&mut Entity> {
        self.arena.entity_mut(handle)
    }

    /// Makes a new instance managed by the scope's unit of work.
    ///
    /// Instances persisted while a traversal runs are picked up by its next round.
    pub fn persist(&mut self, entity: Entity) -> CoreResult<EntityHandle> {
        let handle = self.arena.insert(entity);
        let entity = self.arena.entity_mut(handle)?;
        self.registry.register(handle, entity, &self.session);
        Ok(handle)
    }
}
