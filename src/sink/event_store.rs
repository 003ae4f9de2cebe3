//! In-memory sink with callbacks and filtering.
//!
//! Useful as the delivery target in tests and local debugging: every delivered
//! [`LogEvent`] is kept in order and can be queried by kind or predicate.

use super::EventSink;
use crate::error::Result;
use crate::event::{EntityKind, LogEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Type alias for event callback functions
pub type EventCallback = Arc<dyn Fn(&LogEvent) + Send + Sync>;

/// Store for capturing and querying delivered events
pub struct EventStore {
    events: Mutex<Vec<LogEvent>>,
    deliveries: AtomicUsize,
    on_store_callback: Option<EventCallback>,
}

impl EventStore {
    /// Create a new event store
    ///
    /// # Arguments
    ///
    /// * `on_store_callback` - Optional callback function called whenever an event is stored
    pub fn new(on_store_callback: Option<EventCallback>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            deliveries: AtomicUsize::new(0),
            on_store_callback,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store an event, triggering the callback first if one is configured.
    pub fn store(&self, event: LogEvent) {
        if let Some(callback) = &self.on_store_callback {
            callback(&event);
        }
        self.lock().push(event);
    }

    /// Snapshot of every stored event, in delivery order.
    pub fn events(&self) -> Vec<LogEvent> {
        self.lock().clone()
    }

    pub fn events_of_kind(&self, kind: EntityKind) -> Vec<LogEvent> {
        self.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    /// Find a stored event by entity id.
    pub fn find(&self, id: &str) -> Option<LogEvent> {
        self.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Count events matching an optional predicate
    pub fn count_events(&self, filter_func: Option<&dyn Fn(&LogEvent) -> bool>) -> usize {
        let events = self.lock();
        match filter_func {
            Some(filter) => events.iter().filter(|e| filter(e)).count(),
            None => events.len(),
        }
    }

    /// Printable summaries of events matching an optional predicate
    pub fn get_event_summaries(&self, filter_func: Option<&dyn Fn(&LogEvent) -> bool>) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| filter_func.is_none_or(|filter| filter(e)))
            .map(LogEvent::printable_summary)
            .collect()
    }

    /// Get the last N event summaries, optionally filtered
    pub fn get_last_n_summaries(
        &self,
        n: usize,
        filter_func: Option<&dyn Fn(&LogEvent) -> bool>,
    ) -> Vec<String> {
        let events = self.lock();
        let filtered: Vec<_> =
            events.iter().filter(|e| filter_func.is_none_or(|filter| filter(e))).collect();

        let start_idx = filtered.len().saturating_sub(n);
        filtered[start_idx..].iter().map(|e| e.printable_summary()).collect()
    }

    /// Number of batches delivered to this store.
    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Clear all events from the store
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl EventSink for EventStore {
    async fn deliver(&self, events: &[LogEvent]) -> Result<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        for event in events {
            self.store(event.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{GenerationPayload, SpanPayload, Timestamps, ToolCallPayload};
    use chrono::Utc;

    fn event(id: &str, payload: impl Into<crate::event::EventPayload>) -> LogEvent {
        LogEvent::new(
            id,
            None,
            None,
            Timestamps {
                start: Utc::now(),
                end: Some(Utc::now()),
            },
            payload.into(),
        )
    }

    #[test]
    fn test_store_event() {
        let store = EventStore::default();
        store.store(event("span-1", SpanPayload::default()));

        assert_eq!(store.len(), 1);
        assert_eq!(store.find("span-1").map(|e| e.kind), Some(EntityKind::Span));
    }

    #[test]
    fn test_callback_triggered() {
        let callback_count = Arc::new(AtomicUsize::new(0));
        let callback_count_clone = Arc::clone(&callback_count);

        let callback: EventCallback = Arc::new(move |_event| {
            callback_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let store = EventStore::new(Some(callback));
        store.store(event("span-1", SpanPayload::default()));

        assert_eq!(callback_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filter_by_kind() {
        let store = EventStore::default();
        store.store(event("gen-1", GenerationPayload::default()));
        store.store(event("tool-1", ToolCallPayload::default()));
        store.store(event("gen-2", GenerationPayload::default()));

        assert_eq!(store.events_of_kind(EntityKind::Generation).len(), 2);
        assert_eq!(store.events_of_kind(EntityKind::ToolCall).len(), 1);

        let is_tool = |e: &LogEvent| e.kind == EntityKind::ToolCall;
        assert_eq!(store.count_events(Some(&is_tool)), 1);
        assert_eq!(store.count_events(None), 3);
    }

    #[test]
    fn test_last_n_summaries() {
        let store = EventStore::default();
        for i in 0..5 {
            store.store(event(&format!("span-{}", i), SpanPayload::default()));
        }

        let summaries = store.get_last_n_summaries(2, None);
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].contains("span-3"));
        assert!(summaries[1].contains("span-4"));

        assert_eq!(store.get_last_n_summaries(10, None).len(), 5);
    }

    #[test]
    fn test_clear() {
        let store = EventStore::default();
        store.store(event("span-1", SpanPayload::default()));
        store.clear();

        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_deliver_counts_batches() {
        let store = EventStore::default();
        let batch = vec![
            event("gen-1", GenerationPayload::default()),
            event("gen-2", GenerationPayload::default()),
        ];

        tokio_test::block_on(store.deliver(&batch)).unwrap();

        assert_eq!(store.deliveries(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_event_summaries(None).len(), 2);
    }
}
