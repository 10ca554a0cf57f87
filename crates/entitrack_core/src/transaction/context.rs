//! Explicit transaction context.

use crate::entity::EntityArena;
use crate::error::{CoreError, CoreResult};
use crate::registry::InstanceRegistry;
use crate::scope::TxScope;
use crate::transaction::{TransactionDefinition, TransactionState, TransactionSynchronization};
use crate::types::{SessionId, SessionRef, TransactionId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// State of one transaction, passed explicitly to every tracking operation.
pub struct TransactionContext {
    id: TransactionId,
    name: Option<String>,
    read_only: bool,
    state: TransactionState,
    rollback_only: bool,
    synchronization_active: bool,
    /// Unit of work per datastore.
    sessions: BTreeMap<String, SessionRef>,
    registry: Option<InstanceRegistry>,
    synchronizations: Vec<Box<dyn TransactionSynchronization>>,
}

impl TransactionContext {
    pub(crate) fn new(id: TransactionId, definition: TransactionDefinition) -> Self {
        Self {
            id,
            name: definition.name,
            read_only: definition.read_only,
            state: TransactionState::Active,
            rollback_only: false,
            synchronization_active: definition.synchronization,
            sessions: BTreeMap::new(),
            registry: None,
            synchronizations: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the transaction name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true if the transaction may not write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Returns true until the transaction has completed.
    ///
    /// A committing transaction is still active: before-commit callbacks may
    /// register instances and synchronizations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Active | TransactionState::Committing
        )
    }

    /// Returns true if the transaction can only roll back.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Marks the transaction so that commit rolls it back instead.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Returns true if synchronizations may be registered.
    #[must_use]
    pub fn is_synchronization_active(&self) -> bool {
        self.synchronization_active && self.is_active()
    }

    /// Returns the unit of work of the transaction for a datastore, opening it on first use.
    pub fn entity_manager(&mut self, store: &str) -> CoreResult<SessionRef> {
        if !self.is_active() {
            return Err(CoreError::no_transaction());
        }
        let session = self
            .sessions
            .entry(store.to_string())
            .or_insert_with(|| {
                let id = SessionId::new(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
                SessionRef::unit_of_work(id, store)
            });
        Ok(session.clone())
    }

    /// Returns the units of work opened so far.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionRef> {
        self.sessions.values()
    }

    /// Returns the bound registry.
    #[must_use]
    pub fn registry(&self) -> Option<&InstanceRegistry> {
        self.registry.as_ref()
    }

    /// Returns the bound registry for modification.
    pub fn registry_mut(&mut self) -> Option<&mut InstanceRegistry> {
        self.registry.as_mut()
    }

    /// Binds a registry to the transaction.
    pub fn bind_registry(&mut self, registry: InstanceRegistry) -> CoreResult<()> {
        if let Some(bound) = &self.registry {
            return Err(CoreError::store_mismatch(
                registry.store_name(),
                bound.store_name(),
            ));
        }
        self.registry = Some(registry);
        Ok(())
    }

    /// Unbinds and returns the registry.
    pub fn unbind_registry(&mut self) -> Option<InstanceRegistry> {
        self.registry.take()
    }

    /// Builds a scope over the bound registry and its unit of work.
    pub fn scope<'a>(&'a mut self, arena: &'a mut EntityArena) -> CoreResult<TxScope<'a>> {
        let store = self
            .registry
            .as_ref()
            .map(|registry| registry.store_name().to_string())
            .ok_or_else(CoreError::no_transaction)?;
        let session = self.entity_manager(&store)?;
        let registry = self
            .registry
            .as_mut()
            .ok_or_else(CoreError::no_transaction)?;
        Ok(TxScope::new(arena, registry, session))
    }

    /// Registers a synchronization.
    pub fn register_synchronization(
        &mut self,
        synchronization: Box<dyn TransactionSynchronization>,
    ) -> CoreResult<()> {
        if !self.is_synchronization_active() {
            return Err(CoreError::invalid_operation(
                "transaction synchronization is not active",
            ));
        }
        self.synchronizations.push(synchronization);
        Ok(())
    }

    /// Returns the number of synchronizations currently held by the context.
    ///
    /// While a completion phase runs, the synchronizations being called are
    /// held by the manager and only later registrations are counted.
    #[must_use]
    pub fn synchronization_count(&self) -> usize {
        self.synchronizations.len()
    }

    pub(crate) fn take_synchronizations(&mut self) -> Vec<Box<dyn TransactionSynchronization>> {
        std::mem::take(&mut self.synchronizations)
    }

    /// Removes and returns the synchronizations registered after the first `at`.
    pub fn split_synchronizations(&mut self, at: usize) -> Vec<Box<dyn TransactionSynchronization>> {
        if at >= self.synchronizations.len() {
            return Vec::new();
        }
        self.synchronizations.split_off(at)
    }

    /// Appends synchronizations without checking the transaction state.
    pub fn restore_synchronizations(
        &mut self,
        synchronizations: Vec<Box<dyn TransactionSynchronization>>,
    ) {
        self.synchronizations.extend(synchronizations);
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("state", &self.state)
            .field("rollback_only", &self.rollback_only)
            .field("registry", &self.registry)
            .field("synchronizations", &self.synchronizations.len())
            .finish_non_exhaustive()
    }
}
