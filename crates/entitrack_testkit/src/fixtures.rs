//! Entity type fixtures.
//!
//! One type per capability combination the tracking layer branches on.

use entitrack_core::{Entity, EntityId, EntityType};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Change-tracked type with hard deletes.
pub const ORDER: &str = "sample_Order";
/// Change-tracked soft-deletable type.
pub const DOCUMENT: &str = "sample_Document";
/// Change-tracked fetch group aware type.
pub const CUSTOMER: &str = "sample_Customer";
/// Type without change tracking.
pub const REPORT: &str = "sample_Report";

/// Attribute holding the deletion timestamp of documents.
pub const DELETE_TS: &str = "deleteTs";
/// Attribute holding who deleted a document.
pub const DELETED_BY: &str = "deletedBy";

/// Returns the order type.
pub fn order_type() -> Arc<EntityType> {
    EntityType::builder(ORDER).change_tracked().build()
}

/// Returns the soft-deletable document type.
pub fn document_type() -> Arc<EntityType> {
    EntityType::builder(DOCUMENT)
        .change_tracked()
        .soft_delete(DELETE_TS)
        .deleted_by(DELETED_BY)
        .build()
}

/// Returns the fetch group aware customer type.
pub fn customer_type() -> Arc<EntityType> {
    EntityType::builder(CUSTOMER)
        .change_tracked()
        .fetch_group_aware()
        .build()
}

/// Returns the untracked report type.
pub fn report_type() -> Arc<EntityType> {
    EntityType::builder(REPORT).build()
}

/// Returns every fixture type.
pub fn all_types() -> Vec<Arc<EntityType>> {
    vec![order_type(), document_type(), customer_type(), report_type()]
}

/// Creates a new order with a total.
pub fn new_order(total: i64) -> Entity {
    Entity::new(order_type()).with_attribute("total", json!(total))
}

/// Creates a new, not deleted document.
pub fn new_document(title: &str) -> Entity {
    Entity::new(document_type())
        .with_attribute("title", json!(title))
        .with_attribute(DELETE_TS, Value::Null)
}

/// Creates a new customer.
pub fn new_customer(name: &str) -> Entity {
    Entity::new(customer_type()).with_attribute("name", json!(name))
}

/// Creates a new report.
pub fn new_report(title: &str) -> Entity {
    Entity::new(report_type()).with_attribute("title", json!(title))
}

/// Creates an order as it looks when read back from the store.
pub fn loaded_order(total: i64) -> Entity {
    let mut attributes = BTreeMap::new();
    attributes.insert("total".to_string(), json!(total));
    Entity::loaded(order_type(), EntityId::new(), attributes)
}

/// Creates a document as it looks when read back from the store.
pub fn loaded_document(title: &str) -> Entity {
    let mut attributes = BTreeMap::new();
    attributes.insert("title".to_string(), json!(title));
    attributes.insert(DELETE_TS.to_string(), Value::Null);
    Entity::loaded(document_type(), EntityId::new(), attributes)
}
