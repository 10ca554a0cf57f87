//! Change feed collecting and distributing entity changed events.
//!
//! The feed is the default [`ChangeEventManager`]. It folds the change
//! records classified during a transaction into one event per instance, and
//! after the unit of work is flushed it:
//! - runs in-transaction handlers (which may register further synchronizations)
//! - appends the events to a bounded history
//! - sends them to every `mpsc` subscriber
//!
//! ```rust,ignore
//! let feed = Arc::new(ChangeFeed::new());
//! let receiver = feed.subscribe();
//! let support = PersistenceSupport::builder(engine).change_events(feed.clone()).build();
//!
//! // ... commit a transaction
//!
//! while let Ok(event) = receiver.try_recv() {
//!     println!("{:?} {}", event.change_type, event.entity_name);
//! }
//! ```

use crate::change::{ChangeRecord, ChangeType, EntityAttributeChanges, EntityChangedEvent};
use crate::contracts::{ChangeEventHandler, ChangeEventManager};
use crate::entity::EntityArena;
use crate::error::CoreResult;
use crate::transaction::TransactionContext;
use crate::types::EntityHandle;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// An event together with its position in the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    /// Position in the feed, starting at 1.
    pub sequence: u64,
    /// The published event.
    pub event: EntityChangedEvent,
}

/// Default collector and publisher of entity changed events.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<EntityChangedEvent>>>,
    handlers: RwLock<Vec<Arc<dyn ChangeEventHandler>>>,
    history: RwLock<Vec<SequencedEvent>>,
    next_sequence: RwLock<u64>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(10000)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            next_sequence: RwLock::new(1),
            max_history,
        }
    }

    /// Subscribes to published events.
    pub fn subscribe(&self) -> Receiver<EntityChangedEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Adds a handler invoked inside the publishing transaction.
    pub fn add_handler(&self, handler: Arc<dyn ChangeEventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Returns published events with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<SequencedEvent> {
        let history = self.history.read();
        history
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest sequence number in history.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn emit(&self, event: &EntityChangedEvent) {
        {
            let mut next = self.next_sequence.write();
            let mut history = self.history.write();
            history.push(SequencedEvent {
                sequence: *next,
                event: event.clone(),
            });
            *next += 1;
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds a sequence of records of one instance into its net change.
fn fold(
    acc: Option<(ChangeType, EntityAttributeChanges)>,
    record: &ChangeRecord,
) -> (ChangeType, EntityAttributeChanges) {
    let incoming = record.changes.clone().unwrap_or_default();
    match (acc, record.change_type) {
        (None, change_type) => (change_type, incoming),
        (Some((ChangeType::Delete, changes)), _) => (ChangeType::Delete, changes),
        (Some(_), ChangeType::Delete) => (ChangeType::Delete, EntityAttributeChanges::new()),
        (Some((ChangeType::Create, changes)), _) => (ChangeType::Create, changes),
        (Some((ChangeType::Update, mut changes)), ChangeType::Update) => {
            changes.extend(&incoming);
            (ChangeType::Update, changes)
        }
        (Some((ChangeType::Update, _)), ChangeType::Create) => (ChangeType::Create, incoming),
    }
}

impl ChangeEventManager for ChangeFeed {
    fn collect(
        &self,
        instances: &BTreeSet<EntityHandle>,
        records: &[ChangeRecord],
        arena: &EntityArena,
    ) -> Vec<EntityChangedEvent> {
        let mut order = Vec::new();
        let mut folded: BTreeMap<EntityHandle, (ChangeType, EntityAttributeChanges)> =
            BTreeMap::new();

        for record in records.iter().filter(|r| instances.contains(&r.entity)) {
            let previous = folded.remove(&record.entity);
            if previous.is_none() {
                order.push(record.entity);
            }
            folded.insert(record.entity, fold(previous, record));
        }

        order
            .into_iter()
            .filter_map(|handle| {
                let entity = arena.get(handle)?;
                let (change_type, changes) = folded.remove(&handle)?;
                Some(EntityChangedEvent {
                    entity: handle,
                    entity_id: entity.id(),
                    entity_name: entity.type_name().to_string(),
                    change_type,
                    changes,
                })
            })
            .collect()
    }

    fn publish(
        &self,
        ctx: &mut TransactionContext,
        arena: &mut EntityArena,
        events: &[EntityChangedEvent],
    ) -> CoreResult<()> {
        let handlers: Vec<_> = self.handlers.read().iter().cloned().collect();
        for event in events {
            for handler in &handlers {
                handler.handle(ctx, arena, event)?;
            }
        }
        for event in events {
            self.emit(event);
        }
        Ok(())
    }
}
