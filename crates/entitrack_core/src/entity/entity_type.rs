//! Entity type descriptors and their capability sets.

use std::fmt;
use std::sync::Arc;

/// Soft deletion metadata of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeletion {
    /// Attribute holding the deletion timestamp.
    pub deleted_date: String,
    /// Attribute holding the user who deleted the instance, if declared.
    pub deleted_by: Option<String>,
}

/// Capabilities an entity type opts into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Instances carry an attribute change listener while managed.
    pub change_tracked: bool,
    /// Instances are deleted by setting a timestamp instead of removing the row.
    pub soft_delete: Option<SoftDeletion>,
    /// Instances carry a fetch group and a session association.
    pub fetch_group_aware: bool,
}

/// Describes one entity type: its name and what the tracking layer may do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    name: String,
    capabilities: Capabilities,
}

impl EntityType {
    /// Starts a descriptor for the given type name with no capabilities.
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            capabilities: Capabilities::default(),
        }
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the capability set.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns true if instances support attribute change tracking.
    #[must_use]
    pub fn is_change_tracked(&self) -> bool {
        self.capabilities.change_tracked
    }

    /// Returns true if instances are soft deleted.
    #[must_use]
    pub fn is_soft_deletion_supported(&self) -> bool {
        self.capabilities.soft_delete.is_some()
    }

    /// Returns the deletion timestamp attribute, if soft deletion is supported.
    #[must_use]
    pub fn deleted_date_attribute(&self) -> Option<&str> {
        self.capabilities
            .soft_delete
            .as_ref()
            .map(|soft| soft.deleted_date.as_str())
    }

    /// Returns true if instances carry fetch groups.
    #[must_use]
    pub fn is_fetch_group_aware(&self) -> bool {
        self.capabilities.fetch_group_aware
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builder for [`EntityType`].
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    capabilities: Capabilities,
}

impl EntityTypeBuilder {
    /// Enables attribute change tracking.
    #[must_use]
    pub fn change_tracked(mut self) -> Self {
        self.capabilities.change_tracked = true;
        self
    }

    /// Enables soft deletion using the given timestamp attribute.
    #[must_use]
    pub fn soft_delete(mut self, deleted_date: impl Into<String>) -> Self {
        self.capabilities.soft_delete = Some(SoftDeletion {
            deleted_date: deleted_date.into(),
            deleted_by: None,
        });
        self
    }

    /// Records who deleted the instance in the given attribute. Requires soft deletion.
    #[must_use]
    pub fn deleted_by(mut self, attribute: impl Into<String>) -> Self {
        if let Some(soft) = self.capabilities.soft_delete.as_mut() {
            soft.deleted_by = Some(attribute.into());
        }
        self
    }

    /// Enables fetch group awareness.
    #[must_use]
    pub fn fetch_group_aware(mut self) -> Self {
        self.capabilities.fetch_group_aware = true;
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> Arc<EntityType> {
        Arc::new(EntityType {
            name: self.name,
            capabilities: self.capabilities,
        })
    }
}
