//! Classified entity changes and the events published for them.

mod feed;

pub use feed::{ChangeFeed, SequencedEvent};

use crate::entity::{AttributeChange, Entity, EntityId};
use crate::types::EntityHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a classified change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Instance is inserted.
    Create,
    /// Instance attributes are updated.
    Update,
    /// Instance is deleted, physically or softly.
    Delete,
}

/// Attribute deltas of one instance accumulated across listener invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributeChanges {
    changes: BTreeMap<String, AttributeChange>,
}

impl EntityAttributeChanges {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the pending changes of the instance's change listener.
    ///
    /// The first recorded old value of an attribute is kept; the new value is
    /// replaced by the latest one.
    pub fn add_changes(&mut self, entity: &Entity) {
        if let Some(listener) = entity.change_listener() {
            for (attribute, change) in listener.attributes_changed() {
                self.merge(attribute, change);
            }
        }
    }

    /// Merges another change set into this one.
    pub fn extend(&mut self, other: &EntityAttributeChanges) {
        for (attribute, change) in &other.changes {
            self.merge(attribute, change);
        }
    }

    fn merge(&mut self, attribute: &str, change: &AttributeChange) {
        match self.changes.get_mut(attribute) {
            Some(existing) => existing.new = change.new.clone(),
            None => {
                self.changes.insert(attribute.to_string(), change.clone());
            }
        }
    }

    /// Returns the change of one attribute.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&AttributeChange> {
        self.changes.get(attribute)
    }

    /// Returns true if the attribute changed.
    #[must_use]
    pub fn is_changed(&self, attribute: &str) -> bool {
        self.changes.contains_key(attribute)
    }

    /// Returns the changed attribute names.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    /// Returns the number of changed attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if no attribute changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// One classified transition of one instance within a traversal pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// The classified instance.
    pub entity: EntityHandle,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Attribute deltas, computed for updates only.
    pub changes: Option<EntityAttributeChanges>,
}

impl ChangeRecord {
    /// Creates an insert record.
    pub fn create(entity: EntityHandle) -> Self {
        Self {
            entity,
            change_type: ChangeType::Create,
            changes: None,
        }
    }

    /// Creates an update record.
    pub fn update(entity: EntityHandle, changes: EntityAttributeChanges) -> Self {
        Self {
            entity,
            change_type: ChangeType::Update,
            changes: Some(changes),
        }
    }

    /// Creates a delete record.
    pub fn delete(entity: EntityHandle) -> Self {
        Self {
            entity,
            change_type: ChangeType::Delete,
            changes: None,
        }
    }
}

/// Domain event published after the unit of work is flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChangedEvent {
    /// The changed instance.
    pub entity: EntityHandle,
    /// Business identifier of the instance.
    pub entity_id: EntityId,
    /// Entity type name.
    pub entity_name: String,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Attribute deltas; empty for creates and deletes.
    pub changes: EntityAttributeChanges,
}
