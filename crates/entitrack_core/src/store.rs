//! Data store running loads and saves in their own transactions.
//!
//! Every load and save begins a named transaction (`DataStore-load-<n>` or
//! `DataStore-save-<n>`), lets the persistence support track the instances
//! involved and commits. Callers that already hold a transaction use
//! [`JpaDataStore::load_in`] and [`JpaDataStore::save_in`] to join it.

use crate::config::DataStoreConfig;
use crate::entity::{EntityArena, EntityId};
use crate::error::{CoreError, CoreResult, EngineError};
use crate::support::PersistenceSupport;
use crate::transaction::{TransactionContext, TransactionDefinition, TransactionManager};
use crate::types::EntityHandle;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Name prefix of load transactions.
pub const LOAD_TX_PREFIX: &str = "DataStore-load-";

/// Name prefix of save transactions.
pub const SAVE_TX_PREFIX: &str = "DataStore-save-";

static TX_COUNT: AtomicU64 = AtomicU64::new(0);

/// A query handed to the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Entity type name.
    pub entity_name: String,
    /// Query text, if any.
    pub text: Option<String>,
    /// Single id to load.
    pub id: Option<EntityId>,
    /// Ids to load.
    pub ids: Vec<EntityId>,
    /// Scalar attributes selected instead of whole instances.
    pub attributes: Vec<String>,
    /// Index of the first result.
    pub first_result: usize,
    /// Maximum number of results; zero means unlimited.
    pub max_results: usize,
    /// Whether soft-deleted instances are filtered out.
    pub soft_deletion: bool,
}

impl Query {
    /// Creates a query for all instances of an entity type.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            soft_deletion: true,
            ..Self::default()
        }
    }

    /// Sets the query text.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Restricts the query to one id.
    #[must_use]
    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Restricts the query to a list of ids.
    #[must_use]
    pub fn ids(mut self, ids: Vec<EntityId>) -> Self {
        self.ids = ids;
        self
    }

    /// Selects scalar attributes.
    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the index of the first result.
    #[must_use]
    pub const fn first_result(mut self, first: usize) -> Self {
        self.first_result = first;
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub const fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Sets whether soft-deleted instances are filtered out.
    #[must_use]
    pub const fn soft_deletion(mut self, value: bool) -> Self {
        self.soft_deletion = value;
        self
    }
}

/// Instances to write in one save.
#[derive(Debug, Clone)]
pub struct SaveContext {
    /// Instances to insert or update.
    pub to_save: Vec<EntityHandle>,
    /// Instances to delete.
    pub to_remove: Vec<EntityHandle>,
    /// Whether deletes of soft-deletable types set the deletion timestamp instead.
    pub soft_deletion: bool,
}

impl Default for SaveContext {
    fn default() -> Self {
        Self {
            to_save: Vec::new(),
            to_remove: Vec::new(),
            soft_deletion: true,
        }
    }
}

impl SaveContext {
    /// Creates an empty save context with soft deletion enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds instances to insert or update.
    #[must_use]
    pub fn saving(mut self, entities: impl IntoIterator<Item = EntityHandle>) -> Self {
        self.to_save.extend(entities);
        self
    }

    /// Adds instances to delete.
    #[must_use]
    pub fn removing(mut self, entities: impl IntoIterator<Item = EntityHandle>) -> Self {
        self.to_remove.extend(entities);
        self
    }

    /// Sets whether deletes are soft when the type supports it.
    #[must_use]
    pub const fn soft_deletion(mut self, value: bool) -> Self {
        self.soft_deletion = value;
        self
    }
}

/// Instances written by a save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveResult {
    /// Inserted instances followed by updated ones.
    pub saved: Vec<EntityHandle>,
    /// Deleted instances.
    pub removed: Vec<EntityHandle>,
}

/// Data store over one datastore of the persistence engine.
#[derive(Debug)]
pub struct JpaDataStore {
    name: String,
    config: DataStoreConfig,
    support: Arc<PersistenceSupport>,
    transactions: Arc<TransactionManager>,
}

impl JpaDataStore {
    /// Creates a data store.
    pub fn new(
        name: impl Into<String>,
        config: DataStoreConfig,
        support: Arc<PersistenceSupport>,
        transactions: Arc<TransactionManager>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            support,
            transactions,
        }
    }

    /// Returns the datastore name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loads instances in a new transaction.
    ///
    /// Loaded instances come back detached.
    pub fn load(&self, arena: &mut EntityArena, query: &Query) -> CoreResult<Vec<EntityHandle>> {
        let mut ctx = self.begin_load_transaction();
        self.support.register_synchronizations(&mut ctx, &self.name)?;
        match self.load_in(&mut ctx, arena, query) {
            Ok(handles) => {
                self.transactions.commit(&mut ctx, arena)?;
                Ok(handles)
            }
            Err(err) => {
                self.rollback(&mut ctx, arena);
                Err(err)
            }
        }
    }

    /// Loads instances inside an existing transaction.
    ///
    /// Pending changes of the transaction are flushed first so the query
    /// sees them.
    pub fn load_in(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        query: &Query,
    ) -> CoreResult<Vec<EntityHandle>> {
        self.support.process_flush(ctx, arena, &self.name, true)?;

        let handles = if query.ids.is_empty() {
            self.execute_query(arena, query)?
        } else {
            self.load_by_id_batches(arena, query)?
        };

        let session = ctx.entity_manager(&self.name)?;
        for &handle in &handles {
            self.support
                .register_loaded_instance(ctx, arena, handle, &session)?;
        }
        debug!(store = %self.name, entity = %query.entity_name, count = handles.len(), "loaded instances");
        Ok(handles)
    }

    /// Saves and deletes instances in a new transaction.
    pub fn save(&self, arena: &mut EntityArena, context: &SaveContext) -> CoreResult<SaveResult> {
        let mut ctx = self.begin_save_transaction();
        match self.save_in(&mut ctx, arena, context) {
            Ok(result) => {
                self.transactions.commit(&mut ctx, arena)?;
                Ok(result)
            }
            Err(err) => {
                self.rollback(&mut ctx, arena);
                Err(err)
            }
        }
    }

    /// Registers instances to save and delete with an existing transaction.
    ///
    /// New instances are registered first, then existing ones; deletes
    /// follow. Changes are written when the transaction commits.
    pub fn save_in(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        context: &SaveContext,
    ) -> CoreResult<SaveResult> {
        let session = ctx.entity_manager(&self.name)?;
        let mut result = SaveResult::default();

        for pass_new in [true, false] {
            for &handle in &context.to_save {
                if arena.entity(handle)?.state().is_new() == pass_new {
                    self.support.register_instance(ctx, arena, handle, &session)?;
                    result.saved.push(handle);
                }
            }
        }

        for &handle in &context.to_remove {
            self.support.register_instance(ctx, arena, handle, &session)?;
            let entity = arena.entity_mut(handle)?;
            let deleted_date = entity
                .entity_type()
                .deleted_date_attribute()
                .map(str::to_string);
            match deleted_date {
                Some(attribute) if context.soft_deletion => {
                    entity.set(&attribute, Value::from(now_millis()));
                }
                _ => entity.state_mut().set_removed(true),
            }
            result.removed.push(handle);
        }

        debug!(
            store = %self.name,
            saved = result.saved.len(),
            removed = result.removed.len(),
            "registered instances for save"
        );
        Ok(result)
    }

    fn begin_load_transaction(&self) -> TransactionContext {
        let name = format!("{LOAD_TX_PREFIX}{}", TX_COUNT.fetch_add(1, Ordering::Relaxed) + 1);
        self.transactions.begin(
            TransactionDefinition::new()
                .name(name)
                .read_only(self.config.use_read_only_transaction_for_load),
        )
    }

    fn begin_save_transaction(&self) -> TransactionContext {
        let name = format!("{SAVE_TX_PREFIX}{}", TX_COUNT.fetch_add(1, Ordering::Relaxed) + 1);
        self.transactions
            .begin(TransactionDefinition::new().name(name))
    }

    fn rollback(&self, ctx: &mut TransactionContext, arena: &mut EntityArena) {
        if !ctx.is_active() {
            return;
        }
        if let Err(err) = self.transactions.rollback(ctx, arena) {
            warn!(store = %self.name, txid = %ctx.id(), error = %err, "rollback failed");
        }
    }

    fn load_by_id_batches(
        &self,
        arena: &mut EntityArena,
        query: &Query,
    ) -> CoreResult<Vec<EntityHandle>> {
        let batch_size = self
            .config
            .max_ids_batch_size
            .filter(|&size| size > 0)
            .unwrap_or(query.ids.len());

        let mut handles = Vec::with_capacity(query.ids.len());
        for batch in query.ids.chunks(batch_size) {
            let partial = Query {
                ids: batch.to_vec(),
                ..query.clone()
            };
            handles.extend(self.execute_query(arena, &partial)?);
        }
        Ok(handles)
    }

    fn execute_query(&self, arena: &mut EntityArena, query: &Query) -> CoreResult<Vec<EntityHandle>> {
        self.support
            .engine()
            .execute_query(&self.name, query, arena)
            .map_err(translate_query_error)
    }
}

fn translate_query_error(err: EngineError) -> CoreError {
    if err.is_fetch_group_on_report_query() {
        CoreError::unsupported_query("data store cannot execute query for single attributes")
    } else {
        err.into()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
