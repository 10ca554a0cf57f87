//! In-memory persistence engine.
//!
//! Rows are kept per datastore and keyed by business identifier. Flushes
//! upsert every flushed instance and drop hard-deleted ones; queries
//! materialize rows back into the arena as detached instances.
//!
//! Failures can be injected for the next flush or query to exercise the
//! rollback paths of the tracking layer.

use entitrack_core::{
    Entity, EntityArena, EntityHandle, EntityId, EntityType, EngineError, PersistenceEngine,
    Query, FETCH_GROUP_ON_REPORT_QUERY,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Entity type name.
    pub type_name: String,
    /// Attribute values as of the last flush.
    pub attributes: BTreeMap<String, Value>,
}

/// One call to [`PersistenceEngine::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushCall {
    /// Flushed datastore.
    pub store: String,
    /// Number of instances handed to the flush.
    pub instances: usize,
}

/// Persistence engine holding rows in memory.
#[derive(Default)]
pub struct InMemoryEngine {
    types: RwLock<HashMap<String, Arc<EntityType>>>,
    rows: RwLock<BTreeMap<String, BTreeMap<EntityId, StoredRow>>>,
    flushes: Mutex<Vec<FlushCall>>,
    queries: Mutex<Vec<Query>>,
    clears: AtomicUsize,
    next_flush_error: Mutex<Option<EngineError>>,
    next_query_error: Mutex<Option<EngineError>>,
}

impl InMemoryEngine {
    /// Creates an engine knowing the given entity types.
    pub fn new(types: impl IntoIterator<Item = Arc<EntityType>>) -> Self {
        let engine = Self::default();
        for entity_type in types {
            engine.register_type(entity_type);
        }
        engine
    }

    /// Makes an entity type queryable.
    pub fn register_type(&self, entity_type: Arc<EntityType>) {
        self.types
            .write()
            .insert(entity_type.name().to_string(), entity_type);
    }

    /// Stores a row as if a previous transaction had written the instance.
    pub fn seed(&self, store: &str, entity: &Entity) {
        self.rows.write().entry(store.to_string()).or_default().insert(
            entity.id(),
            StoredRow {
                type_name: entity.type_name().to_string(),
                attributes: entity.attributes().clone(),
            },
        );
    }

    /// Returns a stored row.
    pub fn row(&self, store: &str, id: EntityId) -> Option<StoredRow> {
        self.rows.read().get(store)?.get(&id).cloned()
    }

    /// Returns the number of rows of a datastore.
    pub fn row_count(&self, store: &str) -> usize {
        self.rows.read().get(store).map_or(0, BTreeMap::len)
    }

    /// Returns the flush calls so far.
    pub fn flush_calls(&self) -> Vec<FlushCall> {
        self.flushes.lock().clone()
    }

    /// Returns the number of flush calls.
    pub fn flush_count(&self) -> usize {
        self.flushes.lock().len()
    }

    /// Returns the number of first-level cache clears.
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::Relaxed)
    }

    /// Returns the executed queries.
    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }

    /// Makes the next flush fail.
    pub fn fail_next_flush(&self, error: EngineError) {
        *self.next_flush_error.lock() = Some(error);
    }

    /// Makes the next query fail.
    pub fn fail_next_query(&self, error: EngineError) {
        *self.next_query_error.lock() = Some(error);
    }

    fn is_visible(&self, entity_type: &EntityType, row: &StoredRow, query: &Query) -> bool {
        if row.type_name != query.entity_name {
            return false;
        }
        if !query.soft_deletion {
            return true;
        }
        entity_type
            .deleted_date_attribute()
            .and_then(|attribute| row.attributes.get(attribute))
            .map_or(true, Value::is_null)
    }
}

impl PersistenceEngine for InMemoryEngine {
    fn flush(
        &self,
        store: &str,
        instances: &BTreeSet<EntityHandle>,
        arena: &EntityArena,
    ) -> Result<(), EngineError> {
        if let Some(err) = self.next_flush_error.lock().take() {
            return Err(err);
        }
        self.flushes.lock().push(FlushCall {
            store: store.to_string(),
            instances: instances.len(),
        });

        let mut rows = self.rows.write();
        let table = rows.entry(store.to_string()).or_default();
        for entity in instances.iter().filter_map(|&handle| arena.get(handle)) {
            if entity.state().is_removed() {
                table.remove(&entity.id());
            } else {
                table.insert(
                    entity.id(),
                    StoredRow {
                        type_name: entity.type_name().to_string(),
                        attributes: entity.attributes().clone(),
                    },
                );
            }
        }
        Ok(())
    }

    fn clear(&self, _store: &str) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    fn execute_query(
        &self,
        store: &str,
        query: &Query,
        arena: &mut EntityArena,
    ) -> Result<Vec<EntityHandle>, EngineError> {
        if let Some(err) = self.next_query_error.lock().take() {
            return Err(err);
        }
        self.queries.lock().push(query.clone());

        let entity_type = self
            .types
            .read()
            .get(&query.entity_name)
            .cloned()
            .ok_or_else(|| EngineError::query(format!("unknown entity {}", query.entity_name)))?;

        if !query.attributes.is_empty() {
            return Err(EngineError::query(format!(
                "Exception Description: {FETCH_GROUP_ON_REPORT_QUERY}. Query: {}",
                query.entity_name
            )));
        }

        let ids: BTreeSet<EntityId> = query.id.into_iter().chain(query.ids.iter().copied()).collect();
        let limit = if query.max_results == 0 {
            usize::MAX
        } else {
            query.max_results
        };

        let matching: Vec<(EntityId, StoredRow)> = {
            let rows = self.rows.read();
            rows.get(store)
                .into_iter()
                .flat_map(|table| table.iter())
                .filter(|(id, _)| ids.is_empty() || ids.contains(id))
                .filter(|(_, row)| self.is_visible(&entity_type, row, query))
                .skip(query.first_result)
                .take(limit)
                .map(|(id, row)| (*id, row.clone()))
                .collect()
        };

        Ok(matching
            .into_iter()
            .map(|(id, row)| {
                arena.insert(Entity::loaded(
                    Arc::clone(&entity_type),
                    id,
                    row.attributes,
                ))
            })
            .collect())
    }
}
