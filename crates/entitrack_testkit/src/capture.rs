//! Capture of tracing events emitted while a closure runs.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// One captured tracing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Target of the event.
    pub target: String,
    /// Level of the event.
    pub level: Level,
    /// Formatted message.
    pub message: String,
}

/// Layer recording every event it sees.
#[derive(Debug, Clone, Default)]
pub struct CapturingLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturingLayer {
    /// Returns all captured events, in order.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Returns the captured events of one target.
    pub fn events_for(&self, target: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.target == target)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.events.lock().push(CapturedEvent {
            target: metadata.target().to_string(),
            level: *metadata.level(),
            message: visitor.message,
        });
    }
}

/// Runs `f` with a subscriber capturing every event on the current thread.
pub fn capture<T>(f: impl FnOnce() -> T) -> (T, CapturingLayer) {
    let layer = CapturingLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_target_level_and_message() {
        let ((), layer) = capture(|| {
            tracing::debug!(target: "entitrack::test", count = 2, "flushed {} rows", 3);
            tracing::trace!("untargeted");
        });

        let events = layer.events_for("entitrack::test");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::DEBUG);
        assert_eq!(events[0].message, "flushed 3 rows");
        assert_eq!(layer.events().len(), 2);
    }

    #[test]
    fn nothing_is_captured_after_the_closure() {
        let ((), layer) = capture(|| {});
        tracing::debug!(target: "entitrack::test", "outside");
        assert!(layer.events().is_empty());
    }
}
