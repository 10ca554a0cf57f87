//! Commit and rollback reconciliation of the instance registry.

use crate::change::EntityChangedEvent;
use crate::entity::EntityArena;
use crate::error::{CoreError, CoreResult};
use crate::support::PersistenceSupport;
use crate::transaction::{CompletionStatus, TransactionContext, TransactionSynchronization};
use crate::types::EntityHandle;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, trace};

/// Transaction synchronization bound to the registry of one datastore.
///
/// Before commit it classifies every tracked instance, publishes the change
/// events and detaches all instances. After completion it finalizes the
/// identity state of the instances on commit, restores it on rollback and
/// releases the registry.
pub struct RegistrySynchronization {
    support: Arc<PersistenceSupport>,
    store: String,
    order: i32,
}

impl RegistrySynchronization {
    /// Creates the synchronization for a store.
    pub fn new(support: Arc<PersistenceSupport>, store: impl Into<String>) -> Self {
        let order = support.config().synchronization_order;
        Self {
            support,
            store: store.into(),
            order,
        }
    }

    /// Returns the store served.
    #[must_use]
    pub fn store(&self) -> &str {
        &self.store
    }

    fn all_instances(ctx: &TransactionContext) -> CoreResult<BTreeSet<EntityHandle>> {
        ctx.registry()
            .map(|registry| registry.all_instances())
            .ok_or_else(CoreError::no_transaction)
    }

    /// Flushes and clears the unit of work, then detaches every tracked instance.
    fn detach_all(&self, ctx: &mut TransactionContext, arena: &mut EntityArena) -> CoreResult<()> {
        let registry = ctx.registry_mut().ok_or_else(CoreError::no_transaction)?;
        let instances = registry.all_instances();
        for &handle in &instances {
            if arena.get(handle).is_some_and(|e| e.state().is_new()) {
                registry.remember_new_detached(handle);
            }
        }

        let engine = self.support.engine();
        engine.flush(&self.store, &instances, arena)?;
        engine.clear(&self.store);

        for handle in instances {
            if let Some(entity) = arena.get_mut(handle) {
                entity.make_detached();
            }
        }
        Ok(())
    }

    /// Publishes events and runs `before_commit` of synchronizations registered while publishing.
    fn publish(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        events: Vec<EntityChangedEvent>,
    ) -> CoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let before = ctx.synchronization_count();
        self.support.events.publish(ctx, arena, &events)?;
        self.support.stats.record_events(events.len());

        let mut added = ctx.split_synchronizations(before);
        if !added.is_empty() {
            trace!(count = added.len(), "running before-commit of synchronizations registered by publishing");
        }
        let mut result = Ok(());
        for synchronization in &mut added {
            result = synchronization.before_commit(ctx, arena, false);
            if result.is_err() {
                break;
            }
        }
        ctx.restore_synchronizations(added);
        result
    }
}

impl TransactionSynchronization for RegistrySynchronization {
    fn order(&self) -> i32 {
        self.order
    }

    fn before_commit(
        &mut self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        read_only: bool,
    ) -> CoreResult<()> {
        trace!(
            store = %self.store,
            txid = %ctx.id(),
            instances = Self::all_instances(ctx)?.len(),
            read_only,
            "registry synchronization before commit"
        );

        if !read_only {
            self.support.traverse(ctx, arena, false)?;
            self.support.fire_flush(&self.store)?;
        }

        let mut type_names = BTreeSet::new();
        for handle in Self::all_instances(ctx)? {
            let Some(entity) = arena.get_mut(handle) else {
                continue;
            };
            if read_only && entity.has_changes() {
                self.support.stats.record_read_only_violation();
                return Err(CoreError::ReadOnlyViolation { entity: handle });
            }
            if let Some(fetch_group) = entity.fetch_group() {
                if !fetch_group.is_tracked() {
                    let tracked = fetch_group.clone().into_tracked();
                    entity.set_fetch_group(Some(tracked));
                }
            }
            if entity.state().is_new() {
                type_names.insert(entity.type_name().to_string());
            }
            self.support.fire_before_detach(ctx, arena, handle)?;
        }

        if read_only {
            return self.detach_all(ctx, arena);
        }

        let instances = Self::all_instances(ctx)?;
        for listener in self.support.before_commit_listeners() {
            listener.before_commit(&self.store, &instances, arena)?;
        }
        self.support.query_cache.invalidate(&type_names);

        // Collect before detaching: detaching drops the change listeners.
        let events = {
            let registry = ctx.registry().ok_or_else(CoreError::no_transaction)?;
            self.support
                .events
                .collect(&registry.all_instances(), registry.changes(), arena)
        };
        self.detach_all(ctx, arena)?;
        self.publish(ctx, arena, events)
    }

    fn after_completion(
        &mut self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        status: CompletionStatus,
    ) -> CoreResult<()> {
        let Some(mut registry) = ctx.unbind_registry() else {
            return Ok(());
        };
        let instances = registry.all_instances();
        trace!(
            store = %self.store,
            txid = %ctx.id(),
            instances = instances.len(),
            ?status,
            "registry synchronization after completion"
        );

        let committed = status.is_committed();
        if committed {
            for &handle in &instances {
                if let Some(entity) = arena.get_mut(handle) {
                    if entity.state().is_new() {
                        entity.state_mut().set_new(false);
                    }
                    if !entity.state().is_removed() {
                        entity.mark_persisted();
                    }
                }
            }
        } else {
            for &handle in &instances {
                if let Some(entity) = arena.get_mut(handle) {
                    entity.make_detached();
                }
            }
            for &handle in registry.new_detached_instances() {
                if let Some(entity) = arena.get_mut(handle) {
                    let state = entity.state_mut();
                    state.set_new(true);
                    state.set_detached(false);
                }
            }
        }
        self.support.stats.record_completion(committed);

        let mut first_error = None;
        for listener in self.support.after_complete_listeners() {
            if let Err(err) = listener.after_complete(committed, &instances, arena) {
                error!(store = %self.store, error = %err, "after-complete transaction listener failed");
                self.support.stats.record_error();
                first_error.get_or_insert(err);
            }
        }

        registry.clear();
        first_error.map_or(Ok(()), Err)
    }
}
