//! Loads and saves through the data store.

use entitrack_core::{
    AttributeChange, ChangeType, CoreError, DataStoreConfig, EngineError, EngineErrorKind,
    EntityListenerType, Query, SaveContext, TrackerConfig, IMPLICIT_FLUSH_TARGET,
};
use entitrack_testkit::prelude::*;
use serde_json::{json, Value};
use tracing::Level;
use std::sync::Arc;

fn seed_orders(env: &TestEnv, count: i64) -> Vec<entitrack_core::EntityId> {
    (0..count)
        .map(|total| {
            let order = loaded_order(total);
            env.engine.seed("main", &order);
            order.id()
        })
        .collect()
}

#[test]
fn load_returns_detached_instances() {
    let mut env = TestEnv::new();
    seed_orders(&env, 3);
    let store = env.data_store(DataStoreConfig::default());

    let handles = store.load(&mut env.arena, &Query::new(ORDER)).unwrap();

    assert_eq!(handles.len(), 3);
    for handle in handles {
        let state = env.entity(handle).state();
        assert!(state.is_detached());
        assert!(!state.is_new());
        assert!(!state.is_managed());
    }
    assert!(env.published().is_empty());
    assert_eq!(env.transactions.active_count(), 0);
}

#[test]
fn load_by_ids_runs_in_batches() {
    let mut env = TestEnv::new();
    let ids = seed_orders(&env, 5);
    let store = env.data_store(DataStoreConfig::new().max_ids_batch_size(Some(2)));

    let handles = store
        .load(&mut env.arena, &Query::new(ORDER).ids(ids.clone()))
        .unwrap();

    assert_eq!(handles.len(), 5);
    let batches: Vec<usize> = env.engine.queries().iter().map(|q| q.ids.len()).collect();
    assert_eq!(batches, vec![2, 2, 1]);
}

#[test]
fn load_hides_soft_deleted_instances_unless_asked() {
    let mut env = TestEnv::new();
    env.engine.seed("main", &loaded_document("live"));
    env.engine.seed(
        "main",
        &loaded_document("gone").with_attribute(DELETE_TS, json!(1_700_000_000_000_i64)),
    );
    let store = env.data_store(DataStoreConfig::default());

    let visible = store.load(&mut env.arena, &Query::new(DOCUMENT)).unwrap();
    assert_eq!(visible.len(), 1);

    let all = store
        .load(&mut env.arena, &Query::new(DOCUMENT).soft_deletion(false))
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn scalar_query_reports_unsupported_shape() {
    let mut env = TestEnv::new();
    seed_orders(&env, 1);
    let store = env.data_store(DataStoreConfig::default());

    let err = store
        .load(&mut env.arena, &Query::new(ORDER).attributes(["total"]))
        .unwrap_err();

    match err {
        CoreError::UnsupportedQuery { message } => {
            assert_eq!(message, "data store cannot execute query for single attributes");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(env.transactions.active_count(), 0);
}

#[test]
fn other_query_failures_propagate_unchanged() {
    let mut env = TestEnv::new();
    env.engine.fail_next_query(EngineError::query("syntax error near WHERE"));
    let store = env.data_store(DataStoreConfig::default());

    let err = store.load(&mut env.arena, &Query::new(ORDER)).unwrap_err();

    match err {
        CoreError::Engine(engine) => {
            assert_eq!(engine.kind, EngineErrorKind::Query);
            assert_eq!(engine.message, "syntax error near WHERE");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn load_in_flushes_pending_changes_first() {
    let mut env = TestEnv::new();
    let store = env.data_store(DataStoreConfig::default());

    let mut ctx = env.begin();
    let order = env.persist(&mut ctx, new_order(42)).unwrap();
    let id = env.entity(order).id();

    let handles = store
        .load_in(&mut ctx, &mut env.arena, &Query::new(ORDER).id(id))
        .unwrap();

    assert_eq!(handles.len(), 1);
    assert_eq!(env.entity(handles[0]).id(), id);
    assert!(ctx.registry().unwrap().is_saved(order));
    assert_eq!(env.support.stats().flushes(), 1);

    env.commit(&mut ctx).unwrap();
    let events = env.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].change_type, ChangeType::Create);
}

#[test]
fn query_flushing_pending_changes_logs_implicit_flush() {
    let mut env = TestEnv::new();
    let store = env.data_store(DataStoreConfig::default());
    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(5)).unwrap();

    let (handles, logs) = capture(|| store.load_in(&mut ctx, &mut env.arena, &Query::new(ORDER)));

    assert_eq!(handles.unwrap().len(), 1);
    let events = logs.events_for(IMPLICIT_FLUSH_TARGET);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::DEBUG);
    assert_eq!(events[0].message, "implicit flush due to query execution");
    env.commit(&mut ctx).unwrap();
}

#[test]
fn implicit_flush_backtrace_is_logged_at_trace() {
    let mut env = TestEnv::with_config(TrackerConfig::new().implicit_flush_backtrace(true));
    let store = env.data_store(DataStoreConfig::default());
    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(5)).unwrap();

    let (handles, logs) = capture(|| store.load_in(&mut ctx, &mut env.arena, &Query::new(ORDER)));

    handles.unwrap();
    let events = logs.events_for(IMPLICIT_FLUSH_TARGET);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::TRACE);
    assert!(events[0]
        .message
        .starts_with("implicit flush due to query execution, see stack trace for the cause:\n"));
}

#[test]
fn flush_without_pending_changes_or_explicitly_requested_is_silent() {
    let mut env = TestEnv::new();
    let store = env.data_store(DataStoreConfig::default());
    let mut ctx = env.begin();

    let (loaded, logs) = capture(|| store.load_in(&mut ctx, &mut env.arena, &Query::new(ORDER)));
    assert!(loaded.unwrap().is_empty());
    assert!(logs.events_for(IMPLICIT_FLUSH_TARGET).is_empty());

    env.persist(&mut ctx, new_order(5)).unwrap();
    let (report, logs) = capture(|| env.flush(&mut ctx));
    assert_eq!(report.unwrap().changed, 1);
    assert!(logs.events_for(IMPLICIT_FLUSH_TARGET).is_empty());
    env.commit(&mut ctx).unwrap();
}

#[test]
fn save_registers_new_instances_first() {
    let mut env = TestEnv::new();
    let existing = env.arena.insert(loaded_order(1));
    let created = env.arena.insert(new_order(2));
    let store = env.data_store(DataStoreConfig::default());

    let result = store
        .save(&mut env.arena, &SaveContext::new().saving([existing, created]))
        .unwrap();

    assert_eq!(result.saved, vec![created, existing]);
    assert!(result.removed.is_empty());
    let events = env.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, created);
    assert_eq!(env.engine.row_count("main"), 2);
    assert!(!env.entity(created).state().is_new());
}

#[test]
fn save_of_edited_detached_instance_publishes_update() {
    let mut env = TestEnv::new();
    let id = seed_orders(&env, 2)[1];
    let store = env.data_store(DataStoreConfig::default());
    let recorder = Arc::new(RecordingEntityListener::default());
    env.listeners()
        .add_listener(EntityListenerType::BeforeUpdate, recorder.clone());

    let order = store.load(&mut env.arena, &Query::new(ORDER).id(id)).unwrap()[0];
    env.entity_mut(order).set("total", json!(99));
    store
        .save(&mut env.arena, &SaveContext::new().saving([order]))
        .unwrap();

    let events = env.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, order);
    assert_eq!(events[0].change_type, ChangeType::Update);
    assert_eq!(
        events[0].changes.get("total"),
        Some(&AttributeChange::new(json!(1), json!(99)))
    );
    assert_eq!(recorder.count_for(order, EntityListenerType::BeforeUpdate), 1);
    let evictions = env.entity_cache.evictions();
    assert_eq!(evictions.len(), 1);
    assert_eq!(evictions[0].attributes, Some(vec!["total".to_string()]));
    assert_eq!(env.engine.row("main", id).unwrap().attributes["total"], json!(99));

    store
        .save(&mut env.arena, &SaveContext::new().saving([order]))
        .unwrap();
    assert_eq!(env.published().len(), 1);
    assert_eq!(recorder.count_for(order, EntityListenerType::BeforeUpdate), 1);
}

#[test]
fn save_soft_deletes_when_supported() {
    let mut env = TestEnv::new();
    let doc = env.arena.insert(loaded_document("draft"));
    env.engine.seed("main", env.arena.get(doc).unwrap());
    let store = env.data_store(DataStoreConfig::default());

    let result = store
        .save(&mut env.arena, &SaveContext::new().removing([doc]))
        .unwrap();

    assert_eq!(result.removed, vec![doc]);
    assert!(env.entity(doc).is_soft_deleted());
    let events = env.published();
    assert_eq!(events[0].change_type, ChangeType::Delete);
    assert_eq!(env.delete_policy.processed(), vec![doc]);
    let id = env.entity(doc).id();
    assert_ne!(env.engine.row("main", id).unwrap().attributes[DELETE_TS], Value::Null);
}

#[test]
fn save_hard_deletes_types_without_soft_deletion() {
    let mut env = TestEnv::new();
    let order = env.arena.insert(loaded_order(1));
    env.engine.seed("main", env.arena.get(order).unwrap());
    let store = env.data_store(DataStoreConfig::default());

    store
        .save(&mut env.arena, &SaveContext::new().removing([order]))
        .unwrap();

    assert!(env.entity(order).state().is_removed());
    assert_eq!(env.engine.row_count("main"), 0);
    assert_eq!(env.published()[0].change_type, ChangeType::Delete);
    assert_eq!(env.delete_policy.created(), 0);
}

#[test]
fn failed_save_leaves_new_instances_new() {
    let mut env = TestEnv::new();
    let created = env.arena.insert(new_order(1));
    env.engine.fail_next_flush(EngineError::flush("unique constraint violated"));
    let store = env.data_store(DataStoreConfig::default());

    let err = store
        .save(&mut env.arena, &SaveContext::new().saving([created]))
        .unwrap_err();

    assert!(matches!(err, CoreError::Engine(_)));
    assert!(!err.is_fatal());
    let state = env.entity(created).state();
    assert!(state.is_new());
    assert!(!state.is_detached());
    assert!(env.published().is_empty());
    assert_eq!(env.transactions.active_count(), 0);
}
