//! Entity instances.

use crate::entity::{AttributeChangeListener, EntityState, EntityType, FetchGroup};
use crate::types::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Business identifier of an entity instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NULL: Value = Value::Null;

/// An entity instance with dynamic attributes.
///
/// What the tracking layer may do with an instance is decided by its
/// [`EntityType`] capabilities, never by the attributes it happens to hold.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: Arc<EntityType>,
    id: EntityId,
    attributes: BTreeMap<String, Value>,
    state: EntityState,
    change_listener: Option<AttributeChangeListener>,
    fetch_group: Option<FetchGroup>,
    session: Option<SessionId>,
    /// Attribute values as last read from or committed to the store.
    persisted: Option<BTreeMap<String, Value>>,
}

impl Entity {
    /// Creates a new, never persisted instance.
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self::with_id(entity_type, EntityId::new())
    }

    /// Creates a new instance with a known identifier.
    pub fn with_id(entity_type: Arc<EntityType>, id: EntityId) -> Self {
        Self {
            entity_type,
            id,
            attributes: BTreeMap::new(),
            state: EntityState::new_instance(),
            change_listener: None,
            fetch_group: None,
            session: None,
            persisted: None,
        }
    }

    /// Creates an instance as it looks when read back from the store.
    pub fn loaded(
        entity_type: Arc<EntityType>,
        id: EntityId,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            entity_type,
            id,
            persisted: Some(attributes.clone()),
            attributes,
            state: EntityState::detached_instance(),
            change_listener: None,
            fetch_group: None,
            session: None,
        }
    }

    /// Sets an attribute while building the instance, bypassing change tracking.
    ///
    /// On a loaded instance the value counts as stored.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if let Some(persisted) = self.persisted.as_mut() {
            persisted.insert(name.clone(), value.clone());
        }
        self.attributes.insert(name, value);
        self
    }

    /// Returns the type descriptor.
    #[must_use]
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.entity_type.name()
    }

    /// Returns the business identifier.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the identity state.
    #[must_use]
    pub fn state(&self) -> &EntityState {
        &self.state
    }

    /// Returns the identity state for modification.
    pub fn state_mut(&mut self) -> &mut EntityState {
        &mut self.state
    }

    /// Returns an attribute value, `Null` when unset.
    #[must_use]
    pub fn get(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&NULL)
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Writes an attribute and reports the write to the attached change listener.
    pub fn set(&mut self, name: &str, value: Value) {
        let old = self
            .attributes
            .insert(name.to_string(), value.clone())
            .unwrap_or(Value::Null);
        if let Some(listener) = self.change_listener.as_mut() {
            listener.record(name, old, value);
        }
    }

    /// Returns the attached change listener, if any.
    #[must_use]
    pub fn change_listener(&self) -> Option<&AttributeChangeListener> {
        self.change_listener.as_ref()
    }

    /// Returns the attached change listener for modification.
    pub fn change_listener_mut(&mut self) -> Option<&mut AttributeChangeListener> {
        self.change_listener.as_mut()
    }

    /// Attaches a fresh change listener if the type is change tracked and none is attached.
    ///
    /// Writes made to a stored instance while no listener was attached are
    /// recorded as pending changes against its persisted values.
    pub fn attach_change_listener(&mut self) {
        if !self.entity_type.is_change_tracked() || self.change_listener.is_some() {
            return;
        }
        let mut listener = AttributeChangeListener::new();
        if let Some(persisted) = &self.persisted {
            for (name, value) in &self.attributes {
                let old = persisted.get(name).cloned().unwrap_or(Value::Null);
                listener.record(name, old, value.clone());
            }
            for (name, old) in persisted {
                if !self.attributes.contains_key(name) {
                    listener.record(name, old.clone(), Value::Null);
                }
            }
        }
        self.change_listener = Some(listener);
    }

    /// Returns the attribute values as last read from or committed to the store.
    #[must_use]
    pub fn persisted_attributes(&self) -> Option<&BTreeMap<String, Value>> {
        self.persisted.as_ref()
    }

    /// Takes the current attribute values as the stored ones.
    pub fn mark_persisted(&mut self) {
        self.persisted = Some(self.attributes.clone());
    }

    /// Removes the change listener, discarding pending changes.
    pub fn detach_change_listener(&mut self) {
        self.change_listener = None;
    }

    /// Returns true if the attached change listener reports pending changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.change_listener
            .as_ref()
            .is_some_and(AttributeChangeListener::has_changes)
    }

    /// Returns true if the type supports soft deletion and the deletion timestamp is set.
    #[must_use]
    pub fn is_soft_deleted(&self) -> bool {
        self.entity_type
            .deleted_date_attribute()
            .is_some_and(|attribute| !self.get(attribute).is_null())
    }

    /// Returns the fetch group, if any.
    #[must_use]
    pub fn fetch_group(&self) -> Option<&FetchGroup> {
        self.fetch_group.as_ref()
    }

    /// Replaces the fetch group. Ignored for types that are not fetch group aware.
    pub fn set_fetch_group(&mut self, fetch_group: Option<FetchGroup>) {
        if self.entity_type.is_fetch_group_aware() {
            self.fetch_group = fetch_group;
        }
    }

    /// Returns the session the instance is associated with.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Associates the instance with a session.
    pub fn set_session(&mut self, session: Option<SessionId>) {
        self.session = session;
    }

    /// Puts the instance into detached state and drops its ORM associations.
    pub fn make_detached(&mut self) {
        self.state.make_detached();
        self.session = None;
        self.change_listener = None;
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.entity_type.name(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AttributeChange;
    use serde_json::json;

    fn tracked() -> Arc<EntityType> {
        EntityType::builder("sample_Customer").change_tracked().build()
    }

    #[test]
    fn writes_are_not_tracked_without_listener() {
        let mut entity = Entity::new(tracked());
        entity.set("name", json!("Alice"));
        assert!(!entity.has_changes());
        assert_eq!(entity.get("name"), &json!("Alice"));
    }

    #[test]
    fn writes_are_tracked_with_listener() {
        let mut entity = Entity::new(tracked()).with_attribute("name", json!("Alice"));
        entity.attach_change_listener();
        entity.set("name", json!("Bob"));

        assert!(entity.has_changes());
        let change = entity.change_listener().and_then(|l| l.change("name")).cloned();
        assert_eq!(change.map(|c| (c.old, c.new)), Some((json!("Alice"), json!("Bob"))));
    }

    #[test]
    fn untracked_type_never_gets_a_listener() {
        let mut entity = Entity::new(EntityType::builder("sample_Plain").build());
        entity.attach_change_listener();
        assert!(entity.change_listener().is_none());
    }

    #[test]
    fn soft_deleted_reads_deletion_timestamp() {
        let ty = EntityType::builder("sample_Doc")
            .change_tracked()
            .soft_delete("deleteTs")
            .build();
        let mut entity = Entity::new(ty);
        assert!(!entity.is_soft_deleted());

        entity.set("deleteTs", json!(1_700_000_000_000_i64));
        assert!(entity.is_soft_deleted());
    }

    #[test]
    fn make_detached_drops_listener_and_session() {
        let mut entity = Entity::new(tracked());
        entity.attach_change_listener();
        entity.set_session(Some(SessionId::new(3)));
        entity.make_detached();

        assert!(entity.change_listener().is_none());
        assert!(entity.session().is_none());
        assert!(entity.state().is_detached());
    }

    #[test]
    fn detached_edits_surface_when_listener_attaches() {
        let attributes = BTreeMap::from([("name".to_string(), json!("Alice"))]);
        let mut entity = Entity::loaded(tracked(), EntityId::new(), attributes)
            .with_attribute("city", json!("Oslo"));
        entity.set("name", json!("Bob"));
        assert!(!entity.has_changes());

        entity.attach_change_listener();

        let listener = entity.change_listener().unwrap();
        assert_eq!(
            listener.change("name"),
            Some(&AttributeChange::new(json!("Alice"), json!("Bob")))
        );
        assert!(!listener.is_changed("city"));
    }

    #[test]
    fn unedited_loaded_instance_attaches_clean_listener() {
        let attributes = BTreeMap::from([("name".to_string(), json!("Alice"))]);
        let mut entity = Entity::loaded(tracked(), EntityId::new(), attributes);
        entity.attach_change_listener();
        assert!(!entity.has_changes());
    }

    #[test]
    fn committed_values_become_the_baseline() {
        let mut entity = Entity::new(tracked()).with_attribute("name", json!("Alice"));
        assert!(entity.persisted_attributes().is_none());
        entity.mark_persisted();
        entity.set("name", json!("Bob"));
        entity.attach_change_listener();
        assert!(entity.change_listener().unwrap().is_changed("name"));
    }

    #[test]
    fn fetch_group_requires_capability() {
        let mut plain = Entity::new(tracked());
        plain.set_fetch_group(Some(FetchGroup::native(["id"])));
        assert!(plain.fetch_group().is_none());

        let aware = EntityType::builder("sample_Lazy").fetch_group_aware().build();
        let mut entity = Entity::new(aware);
        entity.set_fetch_group(Some(FetchGroup::native(["id"])));
        assert!(entity.fetch_group().is_some());
    }
}
