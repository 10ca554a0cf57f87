//! Classification of deletes and updates.

use entitrack_core::{listener_fn, ChangeType, EntityListenerType};
use entitrack_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;

const DELETED_AT: i64 = 1_700_000_000_000;

#[test]
fn soft_delete_runs_delete_policy() {
    let mut env = TestEnv::new();
    let recorder = Arc::new(RecordingEntityListener::default());
    env.listeners()
        .add_listener(EntityListenerType::BeforeDelete, recorder.clone());

    let mut ctx = env.begin();
    let doc = env.arena.insert(loaded_document("contract"));
    env.register(&mut ctx, doc).unwrap();
    env.entity_mut(doc).set(DELETE_TS, json!(DELETED_AT));
    env.commit(&mut ctx).unwrap();

    let events = env.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].change_type, ChangeType::Delete);
    assert_eq!(env.delete_policy.created(), 1);
    assert_eq!(env.delete_policy.processed(), vec![doc]);
    assert_eq!(recorder.count_for(doc, EntityListenerType::BeforeDelete), 1);

    let id = env.entity(doc).id();
    let row = env.engine.row("main", id).unwrap();
    assert_eq!(row.attributes[DELETE_TS], json!(DELETED_AT));
}

#[test]
fn hard_delete_skips_delete_policy() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    let order = env.arena.insert(loaded_order(1));
    env.engine.seed("main", env.arena.get(order).unwrap());
    env.register(&mut ctx, order).unwrap();
    env.entity_mut(order).state_mut().set_removed(true);
    env.commit(&mut ctx).unwrap();

    let events = env.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].change_type, ChangeType::Delete);
    assert_eq!(env.delete_policy.created(), 0);
    assert_eq!(env.engine.row_count("main"), 0);
    assert_eq!(env.support.stats().deletes(), 1);
}

#[test]
fn already_soft_deleted_instance_is_updated_not_deleted() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    let doc = env
        .arena
        .insert(loaded_document("old").with_attribute(DELETE_TS, json!(DELETED_AT)));
    env.register(&mut ctx, doc).unwrap();
    env.entity_mut(doc).set("title", json!("archived"));
    env.commit(&mut ctx).unwrap();

    let events = env.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].change_type, ChangeType::Update);
    assert_eq!(env.delete_policy.created(), 0);
}

#[test]
fn clearing_deletion_timestamp_is_an_update() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    let doc = env
        .arena
        .insert(loaded_document("restored").with_attribute(DELETE_TS, json!(DELETED_AT)));
    env.register(&mut ctx, doc).unwrap();
    env.entity_mut(doc).set(DELETE_TS, serde_json::Value::Null);
    env.commit(&mut ctx).unwrap();

    let events = env.published();
    assert_eq!(events[0].change_type, ChangeType::Update);
    assert!(events[0].changes.is_changed(DELETE_TS));
}

#[test]
fn update_merges_changes_made_by_listeners() {
    let mut env = TestEnv::new();
    env.listeners().add_entity_listener(
        ORDER,
        EntityListenerType::BeforeUpdate,
        listener_fn(|scope, entity, _kind| {
            scope.entity_mut(entity)?.set("audited", json!(true));
            Ok(())
        }),
    );

    let mut ctx = env.begin();
    let order = env.arena.insert(loaded_order(1));
    env.register(&mut ctx, order).unwrap();
    env.entity_mut(order).set("total", json!(10));
    env.commit(&mut ctx).unwrap();

    let events = env.published();
    assert_eq!(events.len(), 1);
    let changes = &events[0].changes;
    assert_eq!(changes.len(), 2);
    assert_eq!(changes.get("total").unwrap().old, json!(1));
    assert_eq!(changes.get("total").unwrap().new, json!(10));
    assert!(changes.is_changed("audited"));

    let evictions = env.entity_cache.evictions();
    assert_eq!(evictions.len(), 1);
    assert_eq!(
        evictions[0].attributes,
        Some(vec!["audited".to_string(), "total".to_string()])
    );
}

#[test]
fn later_listeners_observe_earlier_listener_writes() {
    let mut env = TestEnv::new();
    env.listeners().add_entity_listener(
        ORDER,
        EntityListenerType::BeforeInsert,
        listener_fn(|scope, entity, _kind| {
            scope.entity_mut(entity)?.set("status", json!("placed"));
            Ok(())
        }),
    );
    env.listeners().add_entity_listener(
        ORDER,
        EntityListenerType::BeforeInsert,
        listener_fn(|scope, entity, _kind| {
            let status = scope.entity(entity)?.get("status").clone();
            scope.entity_mut(entity)?.set("seen", status);
            Ok(())
        }),
    );

    let mut ctx = env.begin();
    let order = env.persist(&mut ctx, new_order(1)).unwrap();
    env.commit(&mut ctx).unwrap();

    assert_eq!(env.entity(order).get("seen"), &json!("placed"));
}

#[test]
fn disabled_listeners_do_not_fire() {
    let mut env = TestEnv::new();
    let recorder = Arc::new(RecordingEntityListener::default());
    env.listeners()
        .add_listener(EntityListenerType::BeforeInsert, recorder.clone());
    env.listeners().disable_listeners(ORDER);

    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(1)).unwrap();
    let doc = env.persist(&mut ctx, new_document("memo")).unwrap();
    env.commit(&mut ctx).unwrap();

    assert_eq!(recorder.fired(), vec![(doc, EntityListenerType::BeforeInsert)]);
    assert_eq!(env.published().len(), 2);
}

#[test]
fn every_change_evicts_exactly_once() {
    let mut env = TestEnv::new();
    let changes = Arc::new(RecordingDataStoreListener::default());
    env.support.add_data_store_listener(changes.clone());

    let mut ctx = env.begin();
    let created = env.persist(&mut ctx, new_order(1)).unwrap();
    let updated = env.arena.insert(loaded_order(2));
    let deleted = env.arena.insert(loaded_document("gone"));
    let untouched = env.arena.insert(loaded_order(3));
    for handle in [updated, deleted, untouched] {
        env.register(&mut ctx, handle).unwrap();
    }
    env.entity_mut(updated).set("total", json!(20));
    env.entity_mut(deleted).set(DELETE_TS, json!(DELETED_AT));
    env.commit(&mut ctx).unwrap();

    for handle in [created, updated, deleted] {
        let id = env.entity(handle).id();
        assert_eq!(env.entity_cache.eviction_count(id), 1);
    }
    let untouched_id = env.entity(untouched).id();
    assert_eq!(env.entity_cache.eviction_count(untouched_id), 0);

    let kinds: Vec<_> = changes.changes().iter().map(|r| r.change_type).collect();
    assert_eq!(kinds, vec![ChangeType::Create, ChangeType::Update, ChangeType::Delete]);
    assert_eq!(changes.flushes(), vec!["main".to_string()]);
}
