//! In-memory event buffer used to resume interrupted response streams.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Default number of events retained per session.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub type EventId = String;
pub type StreamId = String;

/// A message that was written to a response stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: EventId,
    pub stream_id: StreamId,
    pub message: Value,
}

/// Ordered, bounded buffer of stream events. Oldest events are evicted first.
pub struct EventStore {
    events: Mutex<VecDeque<StoredEvent>>,
    seq: AtomicU64,
    capacity: usize,
}

impl EventStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<StoredEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a message on a stream and return its event id.
    pub fn store(&self, stream_id: &str, message: Value) -> EventId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{stream_id}_{seq}");
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(StoredEvent {
            id: id.clone(),
            stream_id: stream_id.to_string(),
            message,
        });
        id
    }

    /// Events recorded on the same stream after `last_event_id`, in insertion
    /// order. Returns `None` when the id is unknown (never issued or evicted).
    pub fn replay_after(&self, last_event_id: &str) -> Option<Vec<StoredEvent>> {
        let events = self.lock();
        let pos = events.iter().position(|e| e.id == last_event_id)?;
        let stream_id = &events[pos].stream_id;
        Some(
            events
                .iter()
                .skip(pos + 1)
                .filter(|e| &e.stream_id == stream_id)
                .cloned()
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replay_keeps_stream_order() {
        let store = EventStore::default();
        let first = store.store("s1", json!({"n": 1}));
        store.store("s2", json!({"n": 2}));
        store.store("s1", json!({"n": 3}));
        store.store("s1", json!({"n": 4}));

        let replayed = store.replay_after(&first).expect("known event");
        let ns: Vec<_> = replayed.iter().map(|e| e.message["n"].clone()).collect();
        assert_eq!(ns, vec![json!(3), json!(4)]);
        assert!(replayed.iter().all(|e| e.stream_id == "s1"));
    }

    #[test]
    fn unknown_event_id() {
        let store = EventStore::default();
        store.store("s1", json!(null));
        assert!(store.replay_after("s1_99").is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let store = EventStore::new(2);
        let first = store.store("s", json!(1));
        store.store("s", json!(2));
        store.store("s", json!(3));
        assert_eq!(store.len(), 2);
        assert!(store.replay_after(&first).is_none());

        store.clear();
        assert!(store.is_empty());
    }
}
