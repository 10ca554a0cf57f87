//! Commit and rollback reconciliation of identity state.

use entitrack_core::{
    ChangeEventHandler, ChangeType, CompletionStatus, CoreError, CoreResult, DataStoreConfig,
    EntityArena, EntityChangedEvent, EntityId, EntityListenerType, FetchGroup, Query, SessionId,
    SessionRef, TransactionContext, TransactionSynchronization,
};
use entitrack_testkit::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn commit_clears_new_flag_and_detaches() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    let created = env.persist(&mut ctx, new_order(1)).unwrap();
    let loaded = env.arena.insert(loaded_order(5));
    env.register(&mut ctx, loaded).unwrap();
    env.entity_mut(loaded).set("total", json!(6));

    env.commit(&mut ctx).unwrap();

    for handle in [created, loaded] {
        let entity = env.entity(handle);
        assert!(!entity.state().is_new());
        assert!(!entity.state().is_managed());
        assert!(entity.state().is_detached());
        assert!(entity.change_listener().is_none());
        assert!(entity.session().is_none());
    }
    let id = env.entity(loaded).id();
    assert_eq!(env.engine.row("main", id).unwrap().attributes["total"], json!(6));
    assert_eq!(env.engine.clear_count(), 1);
    assert!(ctx.registry().is_none());
    assert_eq!(env.support.stats().commits(), 1);
}

#[test]
fn rollback_restores_instance_detached_mid_transaction() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    let order = env.persist(&mut ctx, new_order(1)).unwrap();
    env.flush(&mut ctx).unwrap();

    env.detach(&mut ctx, order).unwrap();
    assert!(!env.entity(order).state().is_new());
    assert!(env.entity(order).state().is_detached());

    env.rollback(&mut ctx).unwrap();

    let state = env.entity(order).state();
    assert!(state.is_new());
    assert!(!state.is_detached());
    assert!(ctx.registry().is_none());
    assert_eq!(env.support.stats().rollbacks(), 1);
}

#[test]
fn failed_publishing_restores_new_instances() {
    let mut env = TestEnv::new();
    env.feed.add_handler(Arc::new(
        |_ctx: &mut TransactionContext,
         _arena: &mut EntityArena,
         _event: &EntityChangedEvent|
         -> CoreResult<()> { Err(CoreError::listener("subscriber rejected event")) },
    ));

    let mut ctx = env.begin();
    let created = env.persist(&mut ctx, new_order(1)).unwrap();
    let loaded = env.arena.insert(loaded_order(2));
    env.register(&mut ctx, loaded).unwrap();
    env.entity_mut(loaded).set("total", json!(3));

    let err = env.commit(&mut ctx).unwrap_err();
    assert!(matches!(err, CoreError::Listener { .. }));

    let created = env.entity(created).state();
    assert!(created.is_new());
    assert!(!created.is_detached());
    let loaded = env.entity(loaded).state();
    assert!(!loaded.is_new());
    assert!(loaded.is_detached());
    assert!(env.published().is_empty());
}

#[test]
fn read_only_change_fails_without_publishing() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin_read_only();
    let order = env.arena.insert(loaded_order(1));
    env.register(&mut ctx, order).unwrap();
    env.entity_mut(order).set("total", json!(2));

    let err = env.commit(&mut ctx).unwrap_err();

    assert!(matches!(err, CoreError::ReadOnlyViolation { entity } if entity == order));
    assert!(err.is_fatal());
    assert!(env.published().is_empty());
    assert_eq!(env.feed.history_len(), 0);
    assert_eq!(env.support.stats().read_only_violations(), 1);
    assert!(env.entity(order).state().is_detached());
}

#[test]
fn query_in_read_only_transaction_keeps_change_pending() {
    let mut env = TestEnv::new();
    let store = env.data_store(DataStoreConfig::default());
    let order = env.arena.insert(loaded_order(1));
    env.engine.seed("main", env.arena.get(order).unwrap());
    let id = env.entity(order).id();

    let mut ctx = env.begin_read_only();
    env.register(&mut ctx, order).unwrap();
    env.entity_mut(order).set("total", json!(2));

    let report = env.flush(&mut ctx).unwrap();
    assert_eq!(report.rounds, 0);
    store
        .load_in(&mut ctx, &mut env.arena, &Query::new(ORDER).id(id))
        .unwrap();
    assert!(env.entity(order).has_changes());

    let err = env.commit(&mut ctx).unwrap_err();

    assert!(matches!(err, CoreError::ReadOnlyViolation { entity } if entity == order));
    assert_eq!(env.engine.row("main", id).unwrap().attributes["total"], json!(1));
    assert_eq!(env.engine.flush_count(), 0);
    assert_eq!(env.support.stats().flushes(), 0);
    assert!(env.published().is_empty());
}

#[test]
fn read_only_commit_detaches_without_events() {
    let mut env = TestEnv::new();
    let recorder = Arc::new(RecordingDataStoreListener::default());
    env.support.add_data_store_listener(recorder.clone());

    let mut ctx = env.begin_read_only();
    let order = env.arena.insert(loaded_order(1));
    env.register(&mut ctx, order).unwrap();
    env.commit(&mut ctx).unwrap();

    assert!(env.entity(order).state().is_detached());
    assert!(env.published().is_empty());
    assert!(env.query_cache.invalidations().is_empty());
    assert!(recorder.flushes().is_empty());
    assert_eq!(env.engine.clear_count(), 1);
}

#[test]
fn rollback_only_transaction_is_rolled_back_on_commit() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    let order = env.persist(&mut ctx, new_order(1)).unwrap();
    ctx.set_rollback_only();

    let err = env.commit(&mut ctx).unwrap_err();

    assert!(matches!(err, CoreError::RolledBack { .. }));
    assert!(env.published().is_empty());
    assert!(env.entity(order).state().is_detached());
    assert_eq!(env.engine.row_count("main"), 0);
}

#[test]
fn before_commit_listeners_run_in_order() {
    let mut env = TestEnv::new();
    let log = journal();
    env.support
        .add_before_commit_listener(Arc::new(JournalTransactionListener::new("second", 20, log.clone())));
    env.support
        .add_before_commit_listener(Arc::new(JournalTransactionListener::new("first", 10, log.clone())));

    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(1)).unwrap();
    env.persist(&mut ctx, new_order(2)).unwrap();
    env.commit(&mut ctx).unwrap();

    assert_eq!(
        *log.lock(),
        vec!["first:before-commit:2".to_string(), "second:before-commit:2".to_string()]
    );
}

#[test]
fn failing_before_commit_listener_rolls_back() {
    let mut env = TestEnv::new();
    let log = journal();
    let listener = Arc::new(JournalTransactionListener::new("guard", 0, log.clone()).failing_before_commit());
    env.support.add_before_commit_listener(listener.clone());
    env.support.add_after_complete_listener(listener);

    let mut ctx = env.begin();
    let order = env.persist(&mut ctx, new_order(1)).unwrap();
    let err = env.commit(&mut ctx).unwrap_err();

    assert!(matches!(err, CoreError::Listener { .. }));
    assert_eq!(
        *log.lock(),
        vec!["guard:before-commit:1".to_string(), "guard:after-complete:false".to_string()]
    );
    assert!(env.published().is_empty());
    assert!(env.entity(order).state().is_detached());
}

#[test]
fn after_complete_failure_still_releases_registry() {
    let mut env = TestEnv::new();
    let log = journal();
    env.support.add_after_complete_listener(Arc::new(
        JournalTransactionListener::new("broken", 0, log.clone()).failing_after_complete(),
    ));
    env.support
        .add_after_complete_listener(Arc::new(JournalTransactionListener::new("audit", 1, log.clone())));

    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(1)).unwrap();
    env.commit(&mut ctx).unwrap();

    assert_eq!(
        *log.lock(),
        vec!["broken:after-complete:true".to_string(), "audit:after-complete:true".to_string()]
    );
    assert!(ctx.registry().is_none());
    assert_eq!(env.transactions.active_count(), 0);
    assert_eq!(env.support.stats().errors(), 1);
}

struct LateSynchronization {
    log: Journal,
}

impl TransactionSynchronization for LateSynchronization {
    fn before_commit(
        &mut self,
        _ctx: &mut TransactionContext,
        _arena: &mut EntityArena,
        read_only: bool,
    ) -> CoreResult<()> {
        self.log.lock().push(format!("late:before-commit:{read_only}"));
        Ok(())
    }

    fn after_completion(
        &mut self,
        _ctx: &mut TransactionContext,
        _arena: &mut EntityArena,
        status: CompletionStatus,
    ) -> CoreResult<()> {
        self.log.lock().push(format!("late:after-completion:{status:?}"));
        Ok(())
    }
}

struct RegisteringHandler {
    log: Journal,
    registered: AtomicBool,
}

impl ChangeEventHandler for RegisteringHandler {
    fn handle(
        &self,
        ctx: &mut TransactionContext,
        _arena: &mut EntityArena,
        _event: &EntityChangedEvent,
    ) -> CoreResult<()> {
        if !self.registered.swap(true, Ordering::SeqCst) {
            ctx.register_synchronization(Box::new(LateSynchronization {
                log: self.log.clone(),
            }))?;
        }
        Ok(())
    }
}

#[test]
fn synchronization_registered_while_publishing_runs_before_commit() {
    let mut env = TestEnv::new();
    let log = journal();
    let handler = Arc::new(RegisteringHandler {
        log: log.clone(),
        registered: AtomicBool::new(false),
    });
    env.feed.add_handler(handler);

    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(1)).unwrap();
    env.persist(&mut ctx, new_order(2)).unwrap();
    env.commit(&mut ctx).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "late:before-commit:false".to_string(),
            "late:after-completion:Committed".to_string(),
        ]
    );
    assert_eq!(env.published().len(), 2);
}

#[test]
fn new_type_names_invalidate_query_cache() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(1)).unwrap();
    env.persist(&mut ctx, new_document("memo")).unwrap();
    let loaded = env.arena.insert(loaded_order(1));
    env.register(&mut ctx, loaded).unwrap();
    env.commit(&mut ctx).unwrap();

    let expected: BTreeSet<String> = [ORDER.to_string(), DOCUMENT.to_string()].into();
    assert_eq!(env.query_cache.invalidations(), vec![expected]);
}

#[test]
fn native_fetch_groups_are_tracked_after_commit() {
    let mut env = TestEnv::new();
    let mut attributes = BTreeMap::new();
    attributes.insert("name".to_string(), json!("Ada"));
    let mut customer = entitrack_core::Entity::loaded(customer_type(), EntityId::new(), attributes);
    customer.set_fetch_group(Some(FetchGroup::native(["name"])));

    let mut ctx = env.begin();
    let handle = env.arena.insert(customer);
    env.register(&mut ctx, handle).unwrap();
    env.commit(&mut ctx).unwrap();

    let fetch_group = env.entity(handle).fetch_group().unwrap();
    assert!(fetch_group.is_tracked());
    assert!(fetch_group.contains("name"));
}

#[test]
fn before_detach_fires_once_per_attached_instance() {
    let mut env = TestEnv::new();
    let recorder = Arc::new(RecordingEntityListener::default());
    env.listeners()
        .add_listener(EntityListenerType::BeforeDetach, recorder.clone());

    let mut ctx = env.begin();
    let kept = env.persist(&mut ctx, new_order(1)).unwrap();
    let dropped = env.persist(&mut ctx, new_order(2)).unwrap();
    env.detach(&mut ctx, dropped).unwrap();
    env.commit(&mut ctx).unwrap();

    assert_eq!(recorder.count_for(kept, EntityListenerType::BeforeDetach), 1);
    assert_eq!(recorder.count_for(dropped, EntityListenerType::BeforeDetach), 1);
    assert_eq!(recorder.count(EntityListenerType::BeforeDetach), 2);
    let events = env.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, kept);
}

#[test]
fn second_store_in_same_transaction_is_rejected() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    env.persist(&mut ctx, new_order(1)).unwrap();

    let err = env.persist_in(&mut ctx, "audit", new_order(2)).unwrap_err();

    assert!(matches!(
        &err,
        CoreError::StoreMismatch { requested, bound } if requested == "audit" && bound == "main"
    ));
    assert!(err.is_fatal());
}

#[test]
fn registration_requires_active_transaction() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    env.commit(&mut ctx).unwrap();

    let err = env.persist(&mut ctx, new_order(1)).unwrap_err();
    assert!(matches!(err, CoreError::NoTransaction));
}

#[test]
fn shared_session_cannot_register_instances() {
    let mut env = TestEnv::new();
    let mut ctx = env.begin();
    let order = env.arena.insert(new_order(1));
    let session = SessionRef::shared(SessionId::new(u64::MAX), None);

    let err = env
        .support
        .register_instance(&mut ctx, &mut env.arena, order, &session)
        .unwrap_err();

    assert!(matches!(err, CoreError::NotUnitOfWork { .. }));
}

#[test]
fn subscribers_receive_committed_events() {
    let mut env = TestEnv::new();
    let receiver = env.feed.subscribe();

    let mut ctx = env.begin();
    let doc = env.arena.insert(loaded_document("draft"));
    env.register(&mut ctx, doc).unwrap();
    env.entity_mut(doc).set("title", json!("final"));
    env.commit(&mut ctx).unwrap();

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.entity, doc);
    assert_eq!(event.change_type, ChangeType::Update);
    assert!(event.changes.is_changed("title"));
    assert!(receiver.try_recv().is_err());
}
