//! Classification of instances visited while saving.

use crate::change::{ChangeRecord, EntityAttributeChanges};
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::listener::EntityListenerType;
use crate::scope::TxScope;
use crate::support::PersistenceSupport;
use crate::traversal::EntityVisitor;
use crate::types::EntityHandle;

/// Visitor deciding whether an instance is inserted, updated, deleted or unchanged.
///
/// Every visit that reports a change has fired exactly one lifecycle
/// listener matching the change and evicted the instance from the entity
/// cache exactly once.
pub struct ChangeClassifier<'a> {
    support: &'a PersistenceSupport,
}

impl<'a> ChangeClassifier<'a> {
    /// Creates a classifier using the collaborators of a persistence support.
    pub fn new(support: &'a PersistenceSupport) -> Self {
        Self { support }
    }

    fn record(&self, scope: &mut TxScope<'_>, record: ChangeRecord) -> CoreResult<()> {
        self.support.stats.record_change(record.change_type);
        self.support.fire_entity_change(scope.store_name(), &record)?;
        scope.registry_mut().record_change(record);
        Ok(())
    }

    fn evict(
        &self,
        scope: &TxScope<'_>,
        entity: EntityHandle,
        changes: Option<&EntityAttributeChanges>,
    ) -> CoreResult<()> {
        self.support
            .entity_cache
            .evict_master_entity(scope.entity(entity)?, changes);
        Ok(())
    }
}

/// Returns true if the instance is to be deleted.
///
/// For soft-deletable types the deletion timestamp must have been changed
/// and be set now; other types rely on the `removed` flag.
pub(crate) fn is_deleted(entity: &Entity) -> bool {
    match entity.entity_type().deleted_date_attribute() {
        Some(attribute) => {
            entity
                .change_listener()
                .is_some_and(|listener| listener.is_changed(attribute))
                && entity.is_soft_deleted()
        }
        None => entity.state().is_removed(),
    }
}

impl EntityVisitor for ChangeClassifier<'_> {
    fn visit(&mut self, scope: &mut TxScope<'_>, entity: EntityHandle) -> CoreResult<bool> {
        let listeners = &self.support.listeners;

        let is_new = scope.entity(entity)?.state().is_new();
        if is_new && !scope.registry().is_saved(entity) {
            listeners.fire_listener(scope, entity, EntityListenerType::BeforeInsert)?;
            self.record(scope, ChangeRecord::create(entity))?;
            self.evict(scope, entity, None)?;
            return Ok(true);
        }

        let current = scope.entity(entity)?;
        if current.change_listener().is_none() {
            return Ok(false);
        }

        if is_deleted(current) {
            let soft_deletion = current.entity_type().is_soft_deletion_supported();
            listeners.fire_listener(scope, entity, EntityListenerType::BeforeDelete)?;
            self.record(scope, ChangeRecord::delete(entity))?;
            if soft_deletion {
                let mut processor = self.support.delete_policy.create();
                processor.set_entity(entity);
                processor.process(scope)?;
            }
            self.evict(scope, entity, None)?;
            return Ok(true);
        }

        if current.has_changes() {
            let mut changes = EntityAttributeChanges::new();
            changes.add_changes(current);

            listeners.fire_listener(scope, entity, EntityListenerType::BeforeUpdate)?;

            // Listeners may have changed the instance further.
            let current = scope.entity(entity)?;
            changes.add_changes(current);

            // Still new after an intermediate flush saved it.
            let record = if current.state().is_new() {
                ChangeRecord::create(entity)
            } else {
                ChangeRecord::update(entity, changes.clone())
            };
            self.record(scope, record)?;
            self.evict(scope, entity, Some(&changes))?;
            return Ok(true);
        }

        Ok(false)
    }
}
