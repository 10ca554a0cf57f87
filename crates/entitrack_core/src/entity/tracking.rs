//! Attribute-level change tracking.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Old and new value of one changed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Value when tracking started (or at the last flush).
    pub old: Value,
    /// Current value.
    pub new: Value,
}

impl AttributeChange {
    /// Creates a change.
    pub fn new(old: Value, new: Value) -> Self {
        Self { old, new }
    }
}

/// Listener attached to a managed change-tracked instance.
///
/// Every attribute write goes through [`record`](Self::record). The listener
/// keeps the first observed old value, so a sequence of writes collapses into a
/// single delta, and a write restoring the original value drops the delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeChangeListener {
    changes: BTreeMap<String, AttributeChange>,
}

impl AttributeChangeListener {
    /// Creates a listener with no pending changes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write of `attribute` from `old` to `new`.
    pub fn record(&mut self, attribute: &str, old: Value, new: Value) {
        match self.changes.get_mut(attribute) {
            Some(existing) => {
                if existing.old == new {
                    self.changes.remove(attribute);
                } else {
                    existing.new = new;
                }
            }
            None => {
                if old != new {
                    self.changes
                        .insert(attribute.to_string(), AttributeChange::new(old, new));
                }
            }
        }
    }

    /// Returns true if any attribute has a pending change.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Returns the pending change of one attribute.
    #[must_use]
    pub fn change(&self, attribute: &str) -> Option<&AttributeChange> {
        self.changes.get(attribute)
    }

    /// Returns true if `attribute` has a pending change.
    #[must_use]
    pub fn is_changed(&self, attribute: &str) -> bool {
        self.changes.contains_key(attribute)
    }

    /// Returns all pending changes keyed by attribute name.
    #[must_use]
    pub fn attributes_changed(&self) -> &BTreeMap<String, AttributeChange> {
        &self.changes
    }

    /// Forgets pending changes after they were written to the store.
    pub fn reset(&mut self) {
        self.changes.clear();
    }
}
