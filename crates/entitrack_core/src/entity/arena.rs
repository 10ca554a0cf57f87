//! Handle-addressed storage of entity instances.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::types::EntityHandle;
use std::collections::HashMap;

/// Owns entity instances and hands out stable handles.
///
/// Handles are never reused, so identity-based sets of instances are plain
/// sets of handles.
#[derive(Debug, Default)]
pub struct EntityArena {
    entities: HashMap<EntityHandle, Entity>,
    next_handle: u64,
}

impl EntityArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an instance and returns its handle.
    pub fn insert(&mut self, entity: Entity) -> EntityHandle {
        self.next_handle += 1;
        let handle = EntityHandle::new(self.next_handle);
        self.entities.insert(handle, entity);
        handle
    }

    /// Returns the instance behind a handle.
    #[must_use]
    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(&handle)
    }

    /// Returns the instance behind a handle for modification.
    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities.get_mut(&handle)
    }

    /// Returns the instance behind a handle or an `EntityNotFound` error.
    pub fn entity(&self, handle: EntityHandle) -> CoreResult<&Entity> {
        self.get(handle)
            .ok_or(CoreError::EntityNotFound { entity: handle })
    }

    /// Returns the instance behind a handle for modification or an `EntityNotFound` error.
    pub fn entity_mut(&mut self, handle: EntityHandle) -> CoreResult<&mut Entity> {
        self.get_mut(handle)
            .ok_or(CoreError::EntityNotFound { entity: handle })
    }

    /// Removes an instance from the arena.
    pub fn remove(&mut self, handle: EntityHandle) -> Option<Entity> {
        self.entities.remove(&handle)
    }

    /// Returns true if the handle refers to a live instance.
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(&handle)
    }

    /// Returns the number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the arena holds no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
